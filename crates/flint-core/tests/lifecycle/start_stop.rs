use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use flint_core::contract::CallContext;
use flint_core::dispatcher::{Dispatcher, DispatcherStatus, Lifecycle};
use flint_core::error::{CallResult, DispatchError, ErrorCategory, codes};

fn ctx() -> CallContext {
    CallContext::builder().build()
}

/// 记录启停次数的哑组件。
#[derive(Default)]
struct Counting {
    starts: AtomicUsize,
    stops: AtomicUsize,
}

#[async_trait]
impl Lifecycle for Counting {
    async fn start(&self, _ctx: CallContext) -> CallResult<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self, _ctx: CallContext) -> CallResult<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 模拟传输层监听失败的底层错误，作为 `with_cause` 注入的原因链。
#[derive(Debug, thiserror::Error)]
#[error("listener port {0} already in use")]
struct PortInUse(u16);

/// 按开关决定启动成败的组件。
struct Flaky {
    healthy: AtomicBool,
}

#[async_trait]
impl Lifecycle for Flaky {
    async fn start(&self, _ctx: CallContext) -> CallResult<()> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DispatchError::new(
                codes::INTERNAL,
                "listener bind failed",
                ErrorCategory::Internal,
            )
            .with_cause(PortInUse(8080)))
        }
    }

    async fn stop(&self, _ctx: CallContext) -> CallResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn one_instance_under_two_names_starts_and_stops_once() {
    let dispatcher = Dispatcher::builder("billing").build().unwrap();
    let shared = Arc::new(Counting::default());
    dispatcher.register_component("tcp", Arc::clone(&shared));
    dispatcher.register_component("tcp-admin", Arc::clone(&shared));
    let solo = Arc::new(Counting::default());
    dispatcher.register_component("metrics", Arc::clone(&solo));

    dispatcher.start(ctx()).await.unwrap();
    assert_eq!(shared.starts.load(Ordering::SeqCst), 1);
    assert_eq!(solo.starts.load(Ordering::SeqCst), 1);

    let report = dispatcher.stop(ctx()).await.unwrap();
    assert_eq!(shared.stops.load(Ordering::SeqCst), 1);
    assert_eq!(solo.stops.load(Ordering::SeqCst), 1);
    assert!(report.drained);
    assert!(report.all_completed());
    // 合并后的记录名携带两个注册名。
    assert!(report.records.iter().any(|record| record.name == "tcp, tcp-admin"));
}

#[tokio::test]
async fn start_failure_unwinds_started_components_and_faults() {
    let dispatcher = Dispatcher::builder("billing").build().unwrap();
    let healthy = Arc::new(Counting::default());
    let flaky = Arc::new(Flaky {
        healthy: AtomicBool::new(false),
    });
    dispatcher.register_component("tcp", Arc::clone(&healthy));
    dispatcher.register_component("grpc", Arc::clone(&flaky));

    let error = dispatcher.start(ctx()).await.unwrap_err();
    assert_eq!(error.code(), codes::COMPONENT_START_FAILED);
    // 失败回执沿 source() 链保留组件侧的底层原因。
    let component_error = std::error::Error::source(&error).expect("component error as cause");
    assert!(component_error.to_string().contains("listener bind failed"));
    let root = std::error::Error::source(component_error).expect("bind failure keeps its root");
    assert!(root.to_string().contains("port 8080"));
    assert_eq!(dispatcher.status(), DispatcherStatus::Faulted);
    // 先启动成功的组件在失败路径上被解卷停掉，不留半启动状态。
    assert_eq!(healthy.starts.load(Ordering::SeqCst), 1);
    assert_eq!(healthy.stops.load(Ordering::SeqCst), 1);

    // Faulted 是显式复位前的终态。
    let error = dispatcher.start(ctx()).await.unwrap_err();
    assert_eq!(error.code(), codes::DISPATCHER_INVALID_TRANSITION);

    flaky.healthy.store(true, Ordering::SeqCst);
    dispatcher.reset().unwrap();
    dispatcher.start(ctx()).await.unwrap();
    assert_eq!(dispatcher.status(), DispatcherStatus::Running);
}

#[tokio::test]
async fn transports_register_under_their_self_reported_name() {
    use flint_core::dispatcher::Transport;

    struct NamedListener {
        inner: Counting,
    }

    #[async_trait]
    impl Lifecycle for NamedListener {
        async fn start(&self, ctx: CallContext) -> CallResult<()> {
            self.inner.start(ctx).await
        }

        async fn stop(&self, ctx: CallContext) -> CallResult<()> {
            self.inner.stop(ctx).await
        }
    }

    impl Transport for NamedListener {
        fn name(&self) -> &str {
            "tcp:0.0.0.0:7400"
        }
    }

    let dispatcher = Dispatcher::builder("billing").build().unwrap();
    let listener = Arc::new(NamedListener {
        inner: Counting::default(),
    });
    dispatcher.register_transport(Arc::clone(&listener));

    dispatcher.start(ctx()).await.unwrap();
    let snapshot = dispatcher.introspect();
    assert_eq!(snapshot.components[0].names, vec!["tcp:0.0.0.0:7400"]);

    let report = dispatcher.stop(ctx()).await.unwrap();
    assert_eq!(report.records[0].name, "tcp:0.0.0.0:7400");
    assert_eq!(listener.inner.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stop_before_start_is_an_idempotent_no_op() {
    let dispatcher = Dispatcher::builder("billing").build().unwrap();
    let report = dispatcher.stop(ctx()).await.unwrap();
    assert!(report.records.is_empty());
    assert_eq!(dispatcher.status(), DispatcherStatus::Created);
}

#[tokio::test]
async fn a_full_cycle_can_be_repeated() {
    let dispatcher = Dispatcher::builder("billing").build().unwrap();
    let component = Arc::new(Counting::default());
    dispatcher.register_component("tcp", Arc::clone(&component));

    dispatcher.start(ctx()).await.unwrap();
    dispatcher.stop(ctx()).await.unwrap();
    // 排水信号不是一次性的：整轮停机后还能再次启动。
    dispatcher.start(ctx()).await.unwrap();
    assert_eq!(dispatcher.status(), DispatcherStatus::Running);
    dispatcher.stop(ctx()).await.unwrap();
    assert_eq!(component.starts.load(Ordering::SeqCst), 2);
    assert_eq!(component.stops.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn stop_failures_travel_in_the_report_not_as_an_error() {
    struct Stubborn;

    #[async_trait]
    impl Lifecycle for Stubborn {
        async fn start(&self, _ctx: CallContext) -> CallResult<()> {
            Ok(())
        }

        async fn stop(&self, _ctx: CallContext) -> CallResult<()> {
            Err(DispatchError::new(
                codes::COMPONENT_STOP_FAILED,
                "socket refused to close",
                ErrorCategory::Internal,
            ))
        }
    }

    let dispatcher = Dispatcher::builder("billing").build().unwrap();
    let clean = Arc::new(Counting::default());
    dispatcher.register_component("stubborn", Arc::new(Stubborn));
    dispatcher.register_component("clean", Arc::clone(&clean));

    dispatcher.start(ctx()).await.unwrap();
    let report = dispatcher.stop(ctx()).await.unwrap();

    assert!(!report.all_completed());
    // 一个组件停不下来不影响其余组件照常停止。
    assert_eq!(clean.stops.load(Ordering::SeqCst), 1);
    assert_eq!(dispatcher.status(), DispatcherStatus::Stopped);
}
