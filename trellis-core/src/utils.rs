//! 内部工具

/// bean 引用关系
pub mod dependency {
    use std::collections::HashMap;
    use std::fmt;
    use std::thread::{self, ThreadId};

    use parking_lot::Mutex;

    /// 记录每个线程上正在构造的 bean 链，用于发现构造期的循环
    ///
    /// 两个线程同时构造同一个 prototype 不是循环，因此链按线程区分。
    #[derive(Debug, Default)]
    pub struct CreationTracker {
        chains: Mutex<HashMap<ThreadId, Vec<String>>>,
    }

    impl CreationTracker {
        pub fn new() -> Self {
            Self::default()
        }

        /// 把 bean 压入当前线程的构造链；它已经在链上时返回 `false`
        pub fn start_creating(&self, bean_id: &str) -> bool {
            let mut chains = self.chains.lock();
            let chain = chains.entry(thread::current().id()).or_default();
            if chain.iter().any(|id| id == bean_id) {
                return false;
            }
            chain.push(bean_id.to_string());
            true
        }

        pub fn finish_creating(&self, bean_id: &str) {
            let thread = thread::current().id();
            let mut chains = self.chains.lock();
            let Some(chain) = chains.get_mut(&thread) else {
                return;
            };
            if let Some(pos) = chain.iter().rposition(|id| id == bean_id) {
                chain.truncate(pos);
            }
            if chain.is_empty() {
                chains.remove(&thread);
            }
        }

        /// 当前线程的构造链，最外层在前
        pub fn current_chain(&self) -> Vec<String> {
            self.chains
                .lock()
                .get(&thread::current().id())
                .cloned()
                .unwrap_or_default()
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum DependencyValidationError {
        /// 环上的 bean，首尾相同
        CircularDependency { cycle: Vec<String> },
        MissingDependency { bean: String, missing: String },
    }

    impl fmt::Display for DependencyValidationError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Self::CircularDependency { cycle } => {
                    write!(f, "reference cycle {}", cycle.join(" -> "))
                }
                Self::MissingDependency { bean, missing } => {
                    write!(f, "'{}' references undefined bean '{}'", bean, missing)
                }
            }
        }
    }

    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        Visiting,
        Done,
    }

    /// 检查引用图：先报告未定义的引用，再报告循环
    ///
    /// `dependencies` 按声明顺序给出每个 bean 及其引用，报告顺序上的第一个问题。
    pub fn validate_dependency_graph(
        dependencies: &[(String, Vec<String>)],
    ) -> Result<(), DependencyValidationError> {
        let graph: HashMap<&str, &[String]> = dependencies
            .iter()
            .map(|(bean, refs)| (bean.as_str(), refs.as_slice()))
            .collect();

        for (bean, refs) in dependencies {
            if let Some(missing) = refs.iter().find(|r| !graph.contains_key(r.as_str())) {
                return Err(DependencyValidationError::MissingDependency {
                    bean: bean.clone(),
                    missing: missing.clone(),
                });
            }
        }

        let mut marks: HashMap<&str, Mark> = HashMap::new();
        let mut path: Vec<&str> = Vec::new();
        for (bean, _) in dependencies {
            if let Some(cycle) = visit(bean, &graph, &mut marks, &mut path) {
                return Err(DependencyValidationError::CircularDependency { cycle });
            }
        }
        Ok(())
    }

    fn visit<'a>(
        bean: &'a str,
        graph: &HashMap<&'a str, &'a [String]>,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        match marks.get(bean) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                let start = path.iter().position(|id| *id == bean).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|id| id.to_string()).collect();
                cycle.push(bean.to_string());
                return Some(cycle);
            }
            None => {}
        }

        marks.insert(bean, Mark::Visiting);
        path.push(bean);
        for reference in graph.get(bean).copied().unwrap_or_default() {
            if let Some(cycle) = visit(reference, graph, marks, path) {
                return Some(cycle);
            }
        }
        path.pop();
        marks.insert(bean, Mark::Done);
        None
    }
}
