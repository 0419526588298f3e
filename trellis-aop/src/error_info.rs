//! 错误信息结构
//!
//! 提供结构化的错误信息传递给异常通知

use trellis_core::error_lineage;

/// 结构化的错误信息
///
/// 用于在 ExceptionRaised 通知中读取被拦截调用抛出的错误
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    /// 错误消息
    pub message: String,

    /// 错误类型名称（谱系中最具体的一项）
    pub error_type: String,

    /// 从最具体到最通用的类型谱系
    pub lineage: Vec<String>,

    /// 错误源链（cause chain）
    pub source_chain: Vec<String>,
}

impl ErrorInfo {
    pub fn from_anyhow(error: &anyhow::Error) -> Self {
        let lineage = error_lineage(error);
        let source_chain = error.chain().skip(1).map(|cause| cause.to_string()).collect();

        Self {
            message: error.to_string(),
            error_type: lineage.first().cloned().unwrap_or_default(),
            lineage,
            source_chain,
        }
    }

    /// 错误是否属于给定类型（含父类型）
    pub fn is_a(&self, type_name: &str) -> bool {
        self.lineage.iter().any(|t| t == type_name)
    }

    /// 获取完整的错误描述（包含源链）
    pub fn full_description(&self) -> String {
        if self.source_chain.is_empty() {
            self.message.clone()
        } else {
            format!(
                "{}\nCaused by:\n  {}",
                self.message,
                self.source_chain.join("\n  ")
            )
        }
    }
}
