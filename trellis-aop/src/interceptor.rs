//! 通知执行顺序
//!
//! 一次拦截调用按以下顺序执行：
//!
//! 1. Before 通知；终止型动作跳过后续步骤，直接进入 Finally
//! 2. Around 通知的前半部分
//! 3. 目标调用
//! 4. Around 通知的后半部分（逆序）
//! 5. After 通知
//!
//! Around 通知在前半部分终止调用时，已经进入的外层 Around 通知仍按逆序执行后半部分。
//!
//! 任一步骤出错时，选择与错误谱系最接近的 ExceptionRaised 通知，
//! 它的返回值成为调用结果；没有合适的通知或通知本身失败时，原错误继续传播。
//! Finally 通知总是执行，它们的失败只记录日志。

use anyhow::Context as _;
use tracing::{debug, warn};
use trellis_core::Value;

use crate::advice::{AdviceDefinition, AdviceType};
use crate::advice_registry::AdviceRegistry;
use crate::error_info::ErrorInfo;
use crate::invocation::{AdviceContext, AdvicePhase};

/// 执行拦截调用
pub fn intercept<F>(
    registry: &AdviceRegistry,
    ctx: &mut AdviceContext,
    call: F,
) -> anyhow::Result<Value>
where
    F: FnOnce(&mut AdviceContext) -> anyhow::Result<Value>,
{
    let outcome = match run_chain(registry, ctx, call) {
        Ok(value) => Ok(value),
        Err(error) => handle_exception(registry, ctx, error),
    };

    run_finally(registry, ctx);
    outcome
}

fn run_advice(advice: &AdviceDefinition, ctx: &mut AdviceContext) -> anyhow::Result<Value> {
    ctx.enter_advice(advice);
    advice.action.execute(ctx).with_context(|| {
        format!(
            "{} advice of aspect '{}' failed ({})",
            advice.advice_type,
            advice.aspect_id,
            advice.action.describe()
        )
    })
}

fn short_circuit_result(ctx: &AdviceContext) -> Value {
    ctx.result().cloned().unwrap_or_default()
}

fn run_chain<F>(registry: &AdviceRegistry, ctx: &mut AdviceContext, call: F) -> anyhow::Result<Value>
where
    F: FnOnce(&mut AdviceContext) -> anyhow::Result<Value>,
{
    ctx.set_phase(AdvicePhase::Before);
    for advice in registry.advices(AdviceType::Before) {
        run_advice(advice, ctx)?;
        if ctx.is_short_circuited() {
            debug!("{} short-circuited by aspect '{}'", ctx.join_point(), advice.aspect_id);
            return Ok(short_circuit_result(ctx));
        }
    }

    ctx.set_phase(AdvicePhase::AroundBefore);
    let arounds = registry.advices(AdviceType::Around);
    for (entered, advice) in arounds.iter().enumerate() {
        run_advice(advice, ctx)?;
        if ctx.is_short_circuited() {
            debug!("{} short-circuited by aspect '{}'", ctx.join_point(), advice.aspect_id);
            let value = short_circuit_result(ctx);
            ctx.set_phase(AdvicePhase::AroundAfter);
            for outer in arounds[..entered].iter().rev() {
                run_advice(outer, ctx)?;
            }
            return Ok(value);
        }
    }

    ctx.set_phase(AdvicePhase::Invoke);
    let value = call(ctx)?;
    ctx.set_result(value.clone());

    ctx.set_phase(AdvicePhase::AroundAfter);
    for advice in arounds.iter().rev() {
        run_advice(advice, ctx)?;
    }

    ctx.set_phase(AdvicePhase::After);
    for advice in registry.advices(AdviceType::After) {
        run_advice(advice, ctx)?;
    }

    Ok(value)
}

fn handle_exception(
    registry: &AdviceRegistry,
    ctx: &mut AdviceContext,
    error: anyhow::Error,
) -> anyhow::Result<Value> {
    let info = ErrorInfo::from_anyhow(&error);
    let Some(handler) = registry.best_exception_handler(&info.lineage) else {
        return Err(error);
    };

    debug!(
        "Handling {} raised at {} with aspect '{}'",
        info.error_type,
        ctx.join_point(),
        handler.aspect_id
    );
    ctx.set_error(info);
    ctx.set_phase(AdvicePhase::ExceptionRaised);

    match run_advice(handler, ctx) {
        Ok(value) => {
            ctx.set_result(value.clone());
            Ok(value)
        }
        Err(handler_error) => {
            warn!(
                "Exception handler of aspect '{}' failed at {}: {:#}",
                handler.aspect_id,
                ctx.join_point(),
                handler_error
            );
            Err(error)
        }
    }
}

fn run_finally(registry: &AdviceRegistry, ctx: &mut AdviceContext) {
    ctx.set_phase(AdvicePhase::Finally);
    for advice in registry.advices(AdviceType::Finally) {
        if let Err(e) = run_advice(advice, ctx) {
            warn!("Finally advice failed at {}: {:#}", ctx.join_point(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{EmitAction, FnAction};
    use crate::aspect::AspectDefinition;
    use crate::joinpoint::{JoinPoint, JoinpointScope};
    use crate::registry::AspectRegistry;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use trellis_core::Fault;

    type Log = Arc<Mutex<Vec<String>>>;

    fn record(log: &Log, entry: &str) -> FnAction {
        let log = Arc::clone(log);
        let entry = entry.to_string();
        FnAction::new(entry.clone(), move |_: &mut AdviceContext| {
            log.lock().push(entry.clone());
            Ok(Value::Null)
        })
    }

    fn jp() -> JoinPoint {
        JoinPoint::bean("greeter", "demo.Greeter", "greet")
    }

    fn registry(defs: Vec<AspectDefinition>) -> AdviceRegistry {
        let mut aspects = AspectRegistry::new();
        aspects.register_all(defs).unwrap();
        AdviceRegistry::build(&aspects, &jp())
    }

    fn call_ok(log: &Log) -> impl FnOnce(&mut AdviceContext) -> anyhow::Result<Value> {
        let log = Arc::clone(log);
        move |_: &mut AdviceContext| {
            log.lock().push("call".to_string());
            Ok(Value::from("hello"))
        }
    }

    #[test]
    fn test_full_sequence() {
        let log = Log::default();
        let registry = registry(vec![
            AspectDefinition::builder("A1", JoinpointScope::Bean)
                .before(record(&log, "A1.before"))
                .around(record(&log, "A1.around"))
                .after(record(&log, "A1.after"))
                .finally(record(&log, "A1.finally"))
                .build(),
            AspectDefinition::builder("A2", JoinpointScope::Bean)
                .before(record(&log, "A2.before"))
                .around(record(&log, "A2.around"))
                .build(),
        ]);

        let mut ctx = AdviceContext::new(jp());
        let value = intercept(&registry, &mut ctx, call_ok(&log)).unwrap();

        assert_eq!(value, Value::from("hello"));
        assert_eq!(
            *log.lock(),
            vec![
                "A1.before",
                "A2.before",
                "A1.around",
                "A2.around",
                "call",
                "A2.around",
                "A1.around",
                "A1.after",
                "A1.finally",
            ]
        );
    }

    #[test]
    fn test_before_order_within_and_across_aspects() {
        let log = Log::default();
        let registry = registry(vec![
            AspectDefinition::builder("A1", JoinpointScope::Bean)
                .before(record(&log, "A1.1"))
                .before(record(&log, "A1.2"))
                .build(),
            AspectDefinition::builder("A2", JoinpointScope::Bean)
                .before(record(&log, "A2.1"))
                .build(),
        ]);

        let mut ctx = AdviceContext::new(jp());
        intercept(&registry, &mut ctx, |_| Ok(Value::Null)).unwrap();
        assert_eq!(*log.lock(), vec!["A1.1", "A1.2", "A2.1"]);
    }

    #[test]
    fn test_terminal_before_skips_call_but_runs_finally() {
        let log = Log::default();
        let registry = registry(vec![AspectDefinition::builder("cache", JoinpointScope::Bean)
            .before(EmitAction::terminal("cached"))
            .before(record(&log, "second.before"))
            .after(record(&log, "after"))
            .finally(record(&log, "finally"))
            .build()]);

        let mut ctx = AdviceContext::new(jp());
        let value = intercept(&registry, &mut ctx, call_ok(&log)).unwrap();

        assert_eq!(value, Value::from("cached"));
        assert_eq!(*log.lock(), vec!["finally"]);
    }

    #[test]
    fn test_terminal_around_unwinds_entered_arounds() {
        let log = Log::default();
        let registry = registry(vec![
            AspectDefinition::builder("outer", JoinpointScope::Bean)
                .around(record(&log, "outer.around"))
                .build(),
            AspectDefinition::builder("guard", JoinpointScope::Bean)
                .around(EmitAction::terminal("denied"))
                .after(record(&log, "after"))
                .finally(record(&log, "finally"))
                .build(),
            AspectDefinition::builder("inner", JoinpointScope::Bean)
                .around(record(&log, "inner.around"))
                .build(),
        ]);

        let mut ctx = AdviceContext::new(jp());
        let value = intercept(&registry, &mut ctx, call_ok(&log)).unwrap();

        assert_eq!(value, Value::from("denied"));
        assert_eq!(*log.lock(), vec!["outer.around", "outer.around", "finally"]);
    }

    #[test]
    fn test_most_specific_exception_handler_replaces_error() {
        let registry = registry(vec![AspectDefinition::builder("errors", JoinpointScope::Bean)
            .on_exception(&["ValueError"], EmitAction::value("value handler"))
            .on_exception(&["TypeError"], EmitAction::value("type handler"))
            .build()]);

        let mut ctx = AdviceContext::new(jp());
        let value = intercept(&registry, &mut ctx, |_| {
            Err(Fault::new("TypeError", "bad").extends("ValueError").into())
        })
        .unwrap();

        assert_eq!(value, Value::from("type handler"));
        assert_eq!(ctx.error().unwrap().error_type, "TypeError");
        assert_eq!(ctx.phase(), AdvicePhase::Finally);
    }

    #[test]
    fn test_unhandled_error_propagates() {
        let log = Log::default();
        let registry = registry(vec![AspectDefinition::builder("errors", JoinpointScope::Bean)
            .on_exception(&["IoError"], EmitAction::value("io"))
            .after(record(&log, "after"))
            .finally(record(&log, "finally"))
            .build()]);

        let mut ctx = AdviceContext::new(jp());
        let err = intercept(&registry, &mut ctx, |_| Err(Fault::new("TypeError", "bad").into()))
            .unwrap_err();

        assert_eq!(err.downcast_ref::<Fault>().unwrap().kind(), "TypeError");
        assert_eq!(*log.lock(), vec!["finally"]);
    }

    #[test]
    fn test_failing_handler_propagates_original_error() {
        let registry = registry(vec![AspectDefinition::builder("errors", JoinpointScope::Bean)
            .on_exception(
                &[],
                FnAction::new("broken handler", |_: &mut AdviceContext| {
                    Err(anyhow::anyhow!("handler broke"))
                }),
            )
            .build()]);

        let mut ctx = AdviceContext::new(jp());
        let err = intercept(&registry, &mut ctx, |_| Err(Fault::new("TypeError", "bad").into()))
            .unwrap_err();
        assert_eq!(err.downcast_ref::<Fault>().unwrap().kind(), "TypeError");
    }

    #[test]
    fn test_failing_before_is_handled_like_call_error() {
        let log = Log::default();
        let registry = registry(vec![AspectDefinition::builder("guard", JoinpointScope::Bean)
            .before(FnAction::new("deny", |_: &mut AdviceContext| {
                Err(Fault::new("AccessDenied", "no").into())
            }))
            .on_exception(&["AccessDenied"], EmitAction::value("denied"))
            .build()]);

        let mut ctx = AdviceContext::new(jp());
        let value = intercept(&registry, &mut ctx, call_ok(&log)).unwrap();
        assert_eq!(value, Value::from("denied"));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_finally_failure_does_not_replace_outcome() {
        let log = Log::default();
        let registry = registry(vec![AspectDefinition::builder("cleanup", JoinpointScope::Bean)
            .finally(FnAction::new("broken finally", |_: &mut AdviceContext| {
                Err(anyhow::anyhow!("cleanup failed"))
            }))
            .finally(record(&log, "second finally"))
            .build()]);

        let mut ctx = AdviceContext::new(jp());
        let value = intercept(&registry, &mut ctx, call_ok(&log)).unwrap();

        assert_eq!(value, Value::from("hello"));
        assert_eq!(*log.lock(), vec!["call", "second finally"]);
    }

    #[test]
    fn test_advices_see_result_and_aspect() {
        let seen = Arc::new(Mutex::new(None));
        let seen_in_after = Arc::clone(&seen);
        let registry = registry(vec![AspectDefinition::builder("audit", JoinpointScope::Bean)
            .after(FnAction::new("capture", move |ctx: &mut AdviceContext| {
                *seen_in_after.lock() = Some((
                    ctx.aspect_id().map(str::to_string),
                    ctx.result().cloned(),
                    ctx.phase(),
                ));
                Ok(Value::Null)
            }))
            .build()]);

        let mut ctx = AdviceContext::new(jp());
        intercept(&registry, &mut ctx, |_| Ok(Value::from(7))).unwrap();

        let (aspect_id, result, phase) = seen.lock().clone().unwrap();
        assert_eq!(aspect_id.as_deref(), Some("audit"));
        assert_eq!(result, Some(Value::from(7)));
        assert_eq!(phase, AdvicePhase::After);
    }
}
