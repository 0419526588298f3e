//! 作用域与作用域存储
//!
//! 单例与 application 作用域的存储随容器存活；session 存储由 `ScopeManager`
//! 按会话 id 管理；request 存储绑定在当前线程上，离开请求时销毁。

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex, RwLock};

use crate::error::{ContainerError, ContainerResult};
use crate::instance::BeanInstance;

/// Bean 的作用域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Scope {
    /// 单例模式 - 容器中只有一个实例
    #[default]
    Singleton,

    /// 原型模式 - 每次请求都创建新实例
    Prototype,

    /// 请求作用域 - 每个请求一个实例
    Request,

    /// 会话作用域 - 每个会话一个实例
    Session,

    /// 应用作用域 - 与单例相同的生命周期，独立的存储
    Application,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Singleton => "singleton",
            Scope::Prototype => "prototype",
            Scope::Request => "request",
            Scope::Session => "session",
            Scope::Application => "application",
        }
    }

    /// 需要外部作用域（请求或会话）处于活动状态
    pub fn is_external(&self) -> bool {
        matches!(self, Scope::Request | Scope::Session)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = ContainerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "singleton" => Ok(Scope::Singleton),
            "prototype" => Ok(Scope::Prototype),
            "request" => Ok(Scope::Request),
            "session" => Ok(Scope::Session),
            "application" => Ok(Scope::Application),
            other => Err(ContainerError::Config(format!("Unknown scope '{}'", other))),
        }
    }
}

/// 存储中的一个实例
#[derive(Debug, Clone)]
pub struct ScopeInstance {
    pub bean_id: String,
    pub instance: BeanInstance,
    pub destroy_method: Option<String>,
}

impl ScopeInstance {
    pub fn new(
        bean_id: impl Into<String>,
        instance: BeanInstance,
        destroy_method: Option<String>,
    ) -> Self {
        Self {
            bean_id: bean_id.into(),
            instance,
            destroy_method,
        }
    }

    fn destroy(&self) {
        let Some(method) = &self.destroy_method else {
            return;
        };
        tracing::debug!("Invoking destroy method '{}' on bean '{}'", method, self.bean_id);
        if let Err(e) = self.instance.invoke(method, &[]) {
            tracing::warn!(
                "Destroy method '{}' of bean '{}' failed: {:#}",
                method,
                self.bean_id,
                e
            );
        }
    }
}

#[derive(Default)]
struct StoreEntries {
    instances: HashMap<String, ScopeInstance>,
    /// 创建顺序，销毁时逆序执行
    order: Vec<String>,
}

/// 一个作用域实例的存储 (bean id → ScopeInstance)
///
/// 读取不加构造锁。每个 bean id 有自己的可重入构造锁：不同 bean 的构造互不阻塞，
/// 依赖图无环时跨作用域的构造链不会互相等待；同一线程再次进入时由构造链检测循环。
pub struct ScopeStore {
    scope: Scope,
    construction: Mutex<HashMap<String, Arc<ReentrantMutex<()>>>>,
    entries: RwLock<StoreEntries>,
}

impl ScopeStore {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            construction: Mutex::new(HashMap::new()),
            entries: RwLock::new(StoreEntries::default()),
        }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// `bean_id` 的构造锁
    pub fn construction_lock(&self, bean_id: &str) -> Arc<ReentrantMutex<()>> {
        Arc::clone(
            self.construction
                .lock()
                .entry(bean_id.to_string())
                .or_insert_with(|| Arc::new(ReentrantMutex::new(()))),
        )
    }

    pub fn get(&self, bean_id: &str) -> Option<BeanInstance> {
        self.entries
            .read()
            .instances
            .get(bean_id)
            .map(|entry| entry.instance.clone())
    }

    pub fn contains(&self, bean_id: &str) -> bool {
        self.entries.read().instances.contains_key(bean_id)
    }

    pub fn put(&self, instance: ScopeInstance) {
        let mut entries = self.entries.write();
        let bean_id = instance.bean_id.clone();
        if entries.instances.insert(bean_id.clone(), instance).is_none() {
            entries.order.push(bean_id);
        }
    }

    /// 移出实例（不调用销毁方法）
    pub fn take(&self, bean_id: &str) -> Option<ScopeInstance> {
        let mut entries = self.entries.write();
        let taken = entries.instances.remove(bean_id);
        if taken.is_some() {
            entries.order.retain(|id| id != bean_id);
        }
        taken
    }

    /// 按创建顺序返回当前实例
    pub fn snapshot(&self) -> Vec<ScopeInstance> {
        let entries = self.entries.read();
        entries
            .order
            .iter()
            .filter_map(|id| entries.instances.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().instances.is_empty()
    }

    /// 按创建逆序调用销毁方法并清空存储，返回销毁的实例数
    ///
    /// 销毁方法在释放存储锁之后执行；再次调用时存储为空，不会重复销毁。
    pub fn destroy(&self) -> usize {
        let drained: Vec<ScopeInstance> = {
            let mut entries = self.entries.write();
            let order = std::mem::take(&mut entries.order);
            let mut instances = std::mem::take(&mut entries.instances);
            order
                .into_iter()
                .rev()
                .filter_map(|id| instances.remove(&id))
                .collect()
        };

        if !drained.is_empty() {
            tracing::debug!("Destroying {} bean(s) in {} scope", drained.len(), self.scope);
        }
        for instance in &drained {
            instance.destroy();
        }
        drained.len()
    }
}

impl fmt::Debug for ScopeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeStore")
            .field("scope", &self.scope)
            .field("beans", &self.entries.read().order)
            .finish()
    }
}

#[derive(Default)]
struct ThreadBindings {
    requests: Vec<Arc<ScopeStore>>,
    sessions: Vec<String>,
}

impl ThreadBindings {
    fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.sessions.is_empty()
    }
}

thread_local! {
    static BINDINGS: RefCell<HashMap<u64, ThreadBindings>> = RefCell::new(HashMap::new());
}

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

/// 外部作用域管理器
///
/// 请求存储与会话绑定按线程记录：调用线程进入作用域后，
/// 该线程上的 request/session 作用域 bean 都从对应存储中取得。
/// 管理器另外持有所有线程上打开的请求存储，`destroy_all` 由此销毁它们。
pub struct ScopeManager {
    id: u64,
    sessions: Mutex<HashMap<String, Arc<ScopeStore>>>,
    open_requests: Mutex<Vec<Weak<ScopeStore>>>,
}

impl ScopeManager {
    pub fn new() -> Self {
        Self {
            id: NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed),
            sessions: Mutex::new(HashMap::new()),
            open_requests: Mutex::new(Vec::new()),
        }
    }

    fn bind<R>(&self, f: impl FnOnce(&mut ThreadBindings) -> R) -> R {
        BINDINGS.with(|bindings| {
            let mut bindings = bindings.borrow_mut();
            f(bindings.entry(self.id).or_default())
        })
    }

    /// 修改已有的绑定；绑定清空后移除本线程上的记录
    fn unbind<R>(&self, f: impl FnOnce(&mut ThreadBindings) -> Option<R>) -> Option<R> {
        BINDINGS.with(|bindings| {
            let mut bindings = bindings.borrow_mut();
            let current = bindings.get_mut(&self.id)?;
            let result = f(current);
            if current.is_empty() {
                bindings.remove(&self.id);
            }
            result
        })
    }

    fn bindings<R>(&self, f: impl FnOnce(&ThreadBindings) -> Option<R>) -> Option<R> {
        BINDINGS.with(|bindings| bindings.borrow().get(&self.id).and_then(f))
    }

    /// 进入请求作用域，可以嵌套
    pub fn enter_request_scope(&self) -> Arc<ScopeStore> {
        let store = Arc::new(ScopeStore::new(Scope::Request));
        {
            let mut open = self.open_requests.lock();
            open.retain(|request| request.strong_count() > 0);
            open.push(Arc::downgrade(&store));
        }
        let depth = self.bind(|b| {
            b.requests.push(Arc::clone(&store));
            b.requests.len()
        });
        tracing::trace!("Entered request scope (depth {})", depth);
        store
    }

    /// 离开最内层的请求作用域并销毁其中的实例
    ///
    /// 存储已被 `destroy_all` 销毁时只解除绑定。
    pub fn exit_request_scope(&self) -> ContainerResult<()> {
        let store = self
            .unbind(|b| b.requests.pop())
            .ok_or(ContainerError::ScopeNotActive(Scope::Request))?;
        self.open_requests.lock().retain(|request| {
            request.strong_count() > 0 && request.as_ptr() != Arc::as_ptr(&store)
        });
        store.destroy();
        tracing::trace!("Exited request scope");
        Ok(())
    }

    pub fn current_request_store(&self) -> Option<Arc<ScopeStore>> {
        self.bindings(|b| b.requests.last().cloned())
    }

    /// 所有线程上仍然打开的请求作用域数
    pub fn open_request_count(&self) -> usize {
        self.open_requests
            .lock()
            .iter()
            .filter(|request| request.strong_count() > 0)
            .count()
    }

    /// 创建或加入会话，并绑定到当前线程
    pub fn enter_session_scope(&self, session_id: &str) -> Arc<ScopeStore> {
        let store = {
            let mut sessions = self.sessions.lock();
            Arc::clone(sessions.entry(session_id.to_string()).or_insert_with(|| {
                tracing::debug!("Creating session store '{}'", session_id);
                Arc::new(ScopeStore::new(Scope::Session))
            }))
        };
        self.bind(|b| b.sessions.push(session_id.to_string()));
        store
    }

    /// 解除当前线程最内层的会话绑定，会话本身保持有效
    pub fn leave_session_scope(&self) -> ContainerResult<()> {
        self.unbind(|b| b.sessions.pop())
            .map(|_| ())
            .ok_or(ContainerError::ScopeNotActive(Scope::Session))
    }

    /// 使会话失效：销毁会话中的实例并解除当前线程上的绑定
    pub fn exit_session_scope(&self, session_id: &str) -> ContainerResult<()> {
        let store = self
            .sessions
            .lock()
            .remove(session_id)
            .ok_or(ContainerError::ScopeNotActive(Scope::Session))?;
        self.unbind(|b| {
            b.sessions.retain(|id| id != session_id);
            Some(())
        });
        store.destroy();
        tracing::debug!("Session '{}' invalidated", session_id);
        Ok(())
    }

    /// 当前线程绑定的会话存储（会话已在别处失效时返回 None）
    pub fn current_session_store(&self) -> Option<Arc<ScopeStore>> {
        let session_id = self.current_session_id()?;
        self.sessions.lock().get(&session_id).cloned()
    }

    pub fn current_session_id(&self) -> Option<String> {
        self.bindings(|b| b.sessions.last().cloned())
    }

    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// request 或 session 作用域的当前存储
    pub fn current_store(&self, scope: Scope) -> Option<Arc<ScopeStore>> {
        match scope {
            Scope::Request => self.current_request_store(),
            Scope::Session => self.current_session_store(),
            Scope::Singleton | Scope::Prototype | Scope::Application => None,
        }
    }

    /// 使所有会话失效，并销毁所有线程上仍然打开的请求存储
    ///
    /// 其他线程上的请求绑定保留到它们各自离开作用域，届时存储已为空。
    pub fn destroy_all(&self) {
        let sessions: Vec<(String, Arc<ScopeStore>)> = self.sessions.lock().drain().collect();
        for (session_id, store) in sessions {
            tracing::debug!("Invalidating session '{}'", session_id);
            store.destroy();
        }

        let requests: Vec<Arc<ScopeStore>> = self
            .open_requests
            .lock()
            .drain(..)
            .filter_map(|request| request.upgrade())
            .collect();
        if !requests.is_empty() {
            tracing::debug!("Destroying {} open request scope(s)", requests.len());
        }
        for store in requests.iter().rev() {
            store.destroy();
        }

        self.unbind(|b| {
            b.sessions.clear();
            b.requests.clear();
            Some(())
        });
    }
}

impl Default for ScopeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ScopeManager {
    fn drop(&mut self) {
        let id = self.id;
        let _ = BINDINGS.try_with(|bindings| {
            if let Ok(mut bindings) = bindings.try_borrow_mut() {
                bindings.remove(&id);
            }
        });
    }
}

impl fmt::Debug for ScopeManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeManager")
            .field("id", &self.id)
            .field("sessions", &self.session_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::ClassDescriptor;
    use crate::instance::PlainBean;
    use crate::value::Value;

    struct Closeable {
        log: Arc<Mutex<Vec<String>>>,
        name: String,
    }

    fn instance(name: &str, log: &Arc<Mutex<Vec<String>>>) -> ScopeInstance {
        let class = Arc::new(
            ClassDescriptor::builder::<Closeable>("test.Closeable")
                .method("close", |this: &Closeable, _| {
                    this.log.lock().push(this.name.clone());
                    Ok(Value::Null)
                })
                .build(),
        );
        let target = Arc::new(Closeable {
            log: Arc::clone(log),
            name: name.to_string(),
        });
        ScopeInstance::new(
            name,
            BeanInstance::new(PlainBean::new(name, class, target)),
            Some("close".to_string()),
        )
    }

    #[test]
    fn test_scope_display_and_parse() {
        assert_eq!(Scope::Session.to_string(), "session");
        assert_eq!("Application".parse::<Scope>().unwrap(), Scope::Application);
        assert!("global".parse::<Scope>().is_err());
        assert_eq!(Scope::default(), Scope::Singleton);
    }

    #[test]
    fn test_destroy_runs_in_reverse_creation_order_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let store = ScopeStore::new(Scope::Singleton);
        store.put(instance("first", &log));
        store.put(instance("second", &log));

        assert_eq!(store.destroy(), 2);
        assert_eq!(store.destroy(), 0);
        assert_eq!(*log.lock(), vec!["second", "first"]);
        assert!(store.is_empty());
    }

    #[test]
    fn test_request_scopes_nest_per_thread() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = ScopeManager::new();
        assert!(manager.current_request_store().is_none());

        let outer = manager.enter_request_scope();
        outer.put(instance("outer", &log));
        let inner = manager.enter_request_scope();
        assert!(Arc::ptr_eq(&manager.current_request_store().unwrap(), &inner));

        manager.exit_request_scope().unwrap();
        assert!(Arc::ptr_eq(&manager.current_request_store().unwrap(), &outer));
        manager.exit_request_scope().unwrap();
        assert_eq!(*log.lock(), vec!["outer"]);

        assert!(matches!(
            manager.exit_request_scope(),
            Err(ContainerError::ScopeNotActive(Scope::Request))
        ));
    }

    #[test]
    fn test_request_binding_is_thread_local() {
        let manager = Arc::new(ScopeManager::new());
        manager.enter_request_scope();

        let other = Arc::clone(&manager);
        let seen = std::thread::spawn(move || other.current_request_store().is_some())
            .join()
            .unwrap();
        assert!(!seen);
        manager.exit_request_scope().unwrap();
    }

    #[test]
    fn test_session_leave_keeps_store_and_exit_destroys() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = ScopeManager::new();

        let store = manager.enter_session_scope("s1");
        store.put(instance("cart", &log));
        manager.leave_session_scope().unwrap();
        assert!(manager.current_session_store().is_none());

        let rejoined = manager.enter_session_scope("s1");
        assert!(Arc::ptr_eq(&store, &rejoined));
        assert!(rejoined.contains("cart"));

        manager.exit_session_scope("s1").unwrap();
        assert_eq!(*log.lock(), vec!["cart"]);
        assert!(manager.current_session_id().is_none());
        assert!(manager.exit_session_scope("s1").is_err());
    }

    #[test]
    fn test_destroy_all_invalidates_sessions() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = ScopeManager::new();
        manager.enter_session_scope("a").put(instance("a", &log));
        manager.enter_session_scope("b").put(instance("b", &log));

        manager.destroy_all();
        let mut destroyed = log.lock().clone();
        destroyed.sort();
        assert_eq!(destroyed, vec!["a", "b"]);
        assert!(manager.session_ids().is_empty());
    }

    #[test]
    fn test_destroy_all_reaches_requests_on_other_threads() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = Arc::new(ScopeManager::new());
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (destroyed_tx, destroyed_rx) = std::sync::mpsc::channel::<()>();

        let worker = {
            let manager = Arc::clone(&manager);
            let log = Arc::clone(&log);
            std::thread::spawn(move || {
                manager.enter_request_scope().put(instance("cart", &log));
                entered_tx.send(()).unwrap();
                destroyed_rx.recv().unwrap();
                manager.exit_request_scope()
            })
        };

        entered_rx.recv().unwrap();
        assert_eq!(manager.open_request_count(), 1);
        manager.destroy_all();
        assert_eq!(*log.lock(), vec!["cart"]);

        destroyed_tx.send(()).unwrap();
        assert!(worker.join().unwrap().is_ok());
        assert_eq!(*log.lock(), vec!["cart"]);
        assert_eq!(manager.open_request_count(), 0);
    }

    #[test]
    fn test_lookups_do_not_bind_the_thread() {
        let manager = ScopeManager::new();
        assert!(manager.current_request_store().is_none());
        assert!(manager.current_session_store().is_none());
        assert!(manager.leave_session_scope().is_err());
        assert!(!BINDINGS.with(|b| b.borrow().contains_key(&manager.id)));

        manager.enter_request_scope();
        assert!(BINDINGS.with(|b| b.borrow().contains_key(&manager.id)));
        manager.exit_request_scope().unwrap();
        assert!(!BINDINGS.with(|b| b.borrow().contains_key(&manager.id)));
    }

    #[test]
    fn test_construction_locks_are_per_bean() {
        let store = ScopeStore::new(Scope::Singleton);
        let first = store.construction_lock("a");
        assert!(Arc::ptr_eq(&first, &store.construction_lock("a")));

        let _held = first.lock();
        let other = store.construction_lock("b");
        assert!(other.try_lock().is_some());
        assert!(first.try_lock().is_some());
    }
}
