//! 集成测试共用的类与规则

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use trellis_aop::{AspectDefinition, InvokeAction, JoinpointScope, PointcutPattern};
use trellis_context::RuleSet;
use trellis_core::{BeanDefinition, ClassDescriptor, ClassRegistry, Fault, Scope, Value};

pub type Log = Arc<Mutex<Vec<String>>>;

pub struct Greeter {
    prefix: String,
    log: Log,
}

pub struct Logger {
    log: Log,
}

pub struct Counter {
    serial: usize,
}

pub struct Cart {
    items: Mutex<Vec<String>>,
}

/// 构造较慢、可以引用另一个 bean 的类
pub struct Relay {
    pub next: Option<String>,
}

/// 测试夹具：共享日志与构造计数
#[derive(Default, Clone)]
pub struct Fixture {
    pub log: Log,
    pub constructions: Arc<AtomicUsize>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn clear(&self) {
        self.log.lock().clear();
    }

    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }

    pub fn classes(&self) -> ClassRegistry {
        let greeter_log = Arc::clone(&self.log);
        let logger_log = Arc::clone(&self.log);
        let cart_log = Arc::clone(&self.log);
        let constructions = Arc::clone(&self.constructions);

        ClassRegistry::new()
            .with(
                ClassDescriptor::builder::<Greeter>("demo.Greeter")
                    .constructor(&[], move |_| {
                        Ok(Greeter {
                            prefix: "Hello".to_string(),
                            log: Arc::clone(&greeter_log),
                        })
                    })
                    .property("prefix", |this: &mut Greeter, value| {
                        this.prefix = value.to_string();
                        Ok(())
                    })
                    .method("greet", |this: &Greeter, args| {
                        let name = args.first().map(Value::to_string).unwrap_or_default();
                        this.log.lock().push(format!("greet:{}", name));
                        Ok(Value::from(format!("{}, {}", this.prefix, name)))
                    })
                    .method("charge", |_: &Greeter, _| {
                        Err(Fault::new("PaymentDeclined", "card declined")
                            .extends("BillingError")
                            .into())
                    })
                    .build(),
            )
            .with(
                ClassDescriptor::builder::<Logger>("demo.Logger")
                    .constructor(&[], move |_| {
                        Ok(Logger {
                            log: Arc::clone(&logger_log),
                        })
                    })
                    .method("record", |this: &Logger, args| {
                        let message = args.first().map(Value::to_string).unwrap_or_default();
                        this.log.lock().push(message);
                        Ok(Value::Null)
                    })
                    .method("recover", |_: &Logger, _| Ok(Value::from("recovered")))
                    .build(),
            )
            .with(
                ClassDescriptor::builder::<Counter>("demo.Counter")
                    .constructor(&[], move |_| {
                        let serial = constructions.fetch_add(1, Ordering::SeqCst) + 1;
                        std::thread::sleep(std::time::Duration::from_millis(20));
                        Ok(Counter { serial })
                    })
                    .method("serial", |this: &Counter, _| Ok(Value::from(this.serial as i64)))
                    .build(),
            )
            .with(
                ClassDescriptor::builder::<Cart>("demo.Cart")
                    .constructor(&[], |_| {
                        Ok(Cart {
                            items: Mutex::new(Vec::new()),
                        })
                    })
                    .method("add", |this: &Cart, args| {
                        let mut items = this.items.lock();
                        items.extend(args.iter().map(Value::to_string));
                        Ok(Value::from(items.len() as i64))
                    })
                    .method("close", move |_: &Cart, _| {
                        cart_log.lock().push("cart closed".to_string());
                        Ok(Value::Null)
                    })
                    .build(),
            )
            .with(
                ClassDescriptor::builder::<Relay>("demo.Relay")
                    .constructor(&[], |_| {
                        std::thread::sleep(std::time::Duration::from_millis(100));
                        Ok(Relay { next: None })
                    })
                    .property("next", |this: &mut Relay, value| {
                        this.next = value.as_bean().map(|bean| bean.bean_id().to_string());
                        Ok(())
                    })
                    .build(),
            )
    }
}

pub fn beans() -> Vec<BeanDefinition> {
    vec![
        BeanDefinition::new("greeter", "demo.Greeter"),
        BeanDefinition::new("logger", "demo.Logger"),
        BeanDefinition::new("counter", "demo.Counter"),
        BeanDefinition::new("cart", "demo.Cart")
            .with_scope(Scope::Request)
            .with_destroy("close"),
        BeanDefinition::new("basket", "demo.Cart")
            .with_scope(Scope::Session)
            .with_destroy("close"),
    ]
}

/// 在 greeter.greet 前后记录 enter/exit 的切面
pub fn logging_aspect(enter: &str, exit: &str) -> AspectDefinition {
    AspectDefinition::builder("logging", JoinpointScope::Bean)
        .pointcut(PointcutPattern::parse("greeter^greet").unwrap())
        .advice_bean("logger")
        .before(InvokeAction::new("record").with_arg(enter))
        .after(InvokeAction::new("record").with_arg(exit))
        .build()
}

pub fn recovery_aspect() -> AspectDefinition {
    AspectDefinition::builder("recovery", JoinpointScope::Bean)
        .pointcut(PointcutPattern::parse("greeter^charge").unwrap())
        .advice_bean("logger")
        .on_exception(&["BillingError"], InvokeAction::new("recover"))
        .build()
}

pub fn rules() -> RuleSet {
    let mut rules = RuleSet::new()
        .aspect(logging_aspect("enter", "exit"))
        .aspect(recovery_aspect());
    rules.beans = beans();
    rules
}
