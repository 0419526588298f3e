//! 多线程下的单例创建与通知注册表

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{rules, Fixture, Relay};
use futures::future::join_all;
use trellis_aop::JoinPoint;
use trellis_context::{ApplicationContext, ContextConfig, ReloadKind, RuleSet};
use trellis_core::{BeanDefinition, ItemValue, Scope, Value};

fn lazy_context_with(fixture: &Fixture, rules: RuleSet) -> Arc<ApplicationContext> {
    let mut config = ContextConfig::default();
    config.kernel.pre_instantiate_singletons = false;
    Arc::new(
        ApplicationContext::builder()
            .classes(fixture.classes())
            .rules(rules)
            .config(config)
            .build()
            .unwrap(),
    )
}

fn lazy_context(fixture: &Fixture) -> Arc<ApplicationContext> {
    lazy_context_with(fixture, rules())
}

fn rules_with_ledger() -> RuleSet {
    let mut rules = rules();
    rules
        .beans
        .push(BeanDefinition::new("ledger", "demo.Cart").with_destroy("close"));
    rules
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_lazy_singleton_created_once() {
    let fixture = Fixture::new();
    let context = lazy_context(&fixture);

    let tasks = (0..100).map(|_| {
        let context = Arc::clone(&context);
        tokio::task::spawn_blocking(move || context.get_bean("counter").unwrap())
    });
    let beans: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(fixture.constructions(), 1);
    assert!(beans.iter().all(|bean| bean.ptr_eq(&beans[0])));
    assert_eq!(beans[0].invoke("serial", &[]).unwrap(), Value::from(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_invocations_share_advice_registry() {
    let fixture = Fixture::new();
    let context = lazy_context(&fixture);

    let tasks = (0..8).map(|i| {
        let context = Arc::clone(&context);
        tokio::task::spawn_blocking(move || {
            let greeter = context.get_bean("greeter").unwrap();
            greeter
                .invoke("greet", &[Value::from(format!("user{}", i))])
                .unwrap()
        })
    });
    for joined in join_all(tasks).await {
        assert!(joined.unwrap().to_string().starts_with("Hello, user"));
    }

    let entries = fixture.entries();
    assert_eq!(entries.len(), 24);
    assert_eq!(entries.iter().filter(|e| e.as_str() == "enter").count(), 8);

    let join_point = JoinPoint::bean("greeter", "demo.Greeter", "greet");
    let first = context.advice_registry(&join_point);
    let second = context.advice_registry(&join_point);
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reload_while_reading() {
    let fixture = Fixture::new();
    let context = lazy_context_with(&fixture, rules_with_ledger());
    let ledger = context.get_bean("ledger").unwrap();

    let readers = (0..8).map(|_| {
        let context = Arc::clone(&context);
        tokio::task::spawn_blocking(move || {
            (0..20)
                .map(|_| {
                    let ledger = context.get_bean("ledger").unwrap();
                    ledger.invoke("add", &[Value::from("entry")]).unwrap();
                    ledger
                })
                .collect::<Vec<_>>()
        })
    });
    let reloader = {
        let context = Arc::clone(&context);
        tokio::task::spawn_blocking(move || {
            for _ in 0..5 {
                context.reload(rules_with_ledger(), ReloadKind::Soft).unwrap();
            }
        })
    };

    for joined in join_all(readers).await {
        assert!(joined.unwrap().iter().all(|seen| seen.ptr_eq(&ledger)));
    }
    reloader.await.unwrap();

    // 定义未变的单例在重载中被保留，从未被销毁
    assert!(context.is_active());
    assert!(fixture.entries().is_empty());
    assert!(context.get_bean("ledger").unwrap().ptr_eq(&ledger));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lazy_chains_across_scopes_complete() {
    let fixture = Fixture::new();
    let mut rules = rules();
    rules.beans.extend([
        BeanDefinition::new("s1", "demo.Relay")
            .with_lazy(true)
            .with_property("next", ItemValue::bean("a1")),
        BeanDefinition::new("a1", "demo.Relay")
            .with_scope(Scope::Application)
            .with_lazy(true),
        BeanDefinition::new("a2", "demo.Relay")
            .with_scope(Scope::Application)
            .with_lazy(true)
            .with_property("next", ItemValue::bean("s2")),
        BeanDefinition::new("s2", "demo.Relay").with_lazy(true),
    ]);
    let context = lazy_context_with(&fixture, rules);

    let tasks = ["s1", "a2"].map(|id| {
        let context = Arc::clone(&context);
        tokio::task::spawn_blocking(move || context.get_bean_as::<Relay>(id).unwrap())
    });
    let relays = tokio::time::timeout(Duration::from_secs(5), join_all(tasks))
        .await
        .expect("lazy construction across scopes did not finish");

    let next: Vec<Option<String>> = relays
        .into_iter()
        .map(|joined| joined.unwrap().next.clone())
        .collect();
    assert_eq!(next, vec![Some("a1".to_string()), Some("s2".to_string())]);
}
