use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use flint_core::contract::{CallContext, Cancellation, RequestMeta};
use flint_core::dispatcher::{Dispatcher, DispatcherStatus, Lifecycle};
use flint_core::error::{CallResult, codes};
use flint_core::pipeline::unary_fn;
use flint_core::registry::ProcedureSpec;
use flint_core::time::{Clock, ManualClock};

fn ctx() -> CallContext {
    CallContext::builder().build()
}

#[derive(Default)]
struct Counting {
    stops: AtomicUsize,
}

#[async_trait]
impl Lifecycle for Counting {
    async fn start(&self, _ctx: CallContext) -> CallResult<()> {
        Ok(())
    }

    async fn stop(&self, _ctx: CallContext) -> CallResult<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 搭一个带手动时钟的分发器：一个 `slow` 过程挂在 oneshot 上，一个
/// `echo` 过程即收即回。返回释放 `slow` 的发送端。
fn slow_dispatcher(
    clock: Arc<ManualClock>,
) -> (Arc<Dispatcher>, tokio::sync::oneshot::Sender<()>) {
    let dispatcher = Dispatcher::builder("billing")
        .with_clock(clock as Arc<dyn Clock>)
        .build()
        .unwrap();

    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    let gate = Arc::new(Mutex::new(Some(release_rx)));
    dispatcher
        .register(ProcedureSpec::unary(
            "billing",
            "slow",
            unary_fn(move |_ctx, request| {
                let gate = Arc::clone(&gate);
                async move {
                    let waiter = gate.lock().take();
                    if let Some(waiter) = waiter {
                        let _ = waiter.await;
                    }
                    Ok(request)
                }
            }),
        ))
        .unwrap();
    dispatcher
        .register(ProcedureSpec::unary(
            "billing",
            "echo",
            unary_fn(|_ctx, request| async move { Ok(request) }),
        ))
        .unwrap();

    (Arc::new(dispatcher), release_tx)
}

async fn wait_in_flight(dispatcher: &Dispatcher, expected: usize) {
    for _ in 0..10_000 {
        if dispatcher.in_flight() == expected {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("in-flight count never reached {expected}");
}

#[tokio::test]
async fn stop_waits_for_the_in_flight_call_and_rejects_newcomers() {
    let clock = Arc::new(ManualClock::new());
    let (dispatcher, release) = slow_dispatcher(Arc::clone(&clock));
    let component = Arc::new(Counting::default());
    dispatcher.register_component("tcp", Arc::clone(&component));
    dispatcher.start(ctx()).await.unwrap();

    let call = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            dispatcher
                .invoke_unary(
                    RequestMeta::new("slow"),
                    Bytes::from_static(b"payload"),
                    Cancellation::new(),
                )
                .await
        })
    };
    wait_in_flight(&dispatcher, 1).await;

    let stopping = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move { dispatcher.stop(ctx()).await })
    };

    // 让停机流程走进排水循环，确认它在等而不是直接收尾。
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
    assert!(!stopping.is_finished(), "在途调用未结束前停机不得完成");
    assert_eq!(dispatcher.status(), DispatcherStatus::Stopping);

    // 停机一旦开始，新调用立即被拒并带重试提示。
    let rejected = dispatcher
        .invoke_unary(
            RequestMeta::new("echo"),
            Bytes::new(),
            Cancellation::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(rejected.code(), codes::DISPATCHER_NOT_RUNNING);
    assert!(rejected.retry_advice().is_some());

    // 放行慢调用，再推时钟唤醒排水轮询。
    release.send(()).unwrap();
    call.await.unwrap().unwrap();
    for _ in 0..10_000 {
        if stopping.is_finished() {
            break;
        }
        clock.advance(Duration::from_millis(5));
        tokio::task::yield_now().await;
    }
    let report = stopping.await.unwrap().unwrap();
    assert!(report.drained);
    assert_eq!(component.stops.load(Ordering::SeqCst), 1);
    assert_eq!(dispatcher.status(), DispatcherStatus::Stopped);
}

#[tokio::test]
async fn cancelled_stop_skips_the_drain_but_still_stops_components() {
    let clock = Arc::new(ManualClock::new());
    let (dispatcher, release) = slow_dispatcher(clock);
    let component = Arc::new(Counting::default());
    dispatcher.register_component("tcp", Arc::clone(&component));
    dispatcher.register_component("metrics", Arc::new(Counting::default()));
    dispatcher.start(ctx()).await.unwrap();

    let call = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            dispatcher
                .invoke_unary(
                    RequestMeta::new("slow"),
                    Bytes::new(),
                    Cancellation::new(),
                )
                .await
        })
    };
    wait_in_flight(&dispatcher, 1).await;

    // 已取消的令牌：不等排水，但每个组件的 stop 仍被调用。
    let cancelled = CallContext::builder()
        .cancellation(Cancellation::cancelled())
        .build();
    let report = dispatcher.stop(cancelled).await.unwrap();
    assert!(!report.drained);
    assert_eq!(report.records.len(), 2);
    assert!(report.all_completed());
    assert_eq!(component.stops.load(Ordering::SeqCst), 1);
    assert_eq!(dispatcher.status(), DispatcherStatus::Stopped);

    // 被困的在途调用随后正常完成，计数回零。
    release.send(()).unwrap();
    call.await.unwrap().unwrap();
    assert_eq!(dispatcher.in_flight(), 0);
}

#[tokio::test]
async fn calls_before_start_are_rejected_with_a_retry_hint() {
    let clock = Arc::new(ManualClock::new());
    let (dispatcher, _release) = slow_dispatcher(clock);

    let error = dispatcher
        .invoke_unary(RequestMeta::new("echo"), Bytes::new(), Cancellation::new())
        .await
        .unwrap_err();
    assert_eq!(error.code(), codes::DISPATCHER_NOT_RUNNING);
    assert!(error.retry_advice().is_some());
}

#[tokio::test]
async fn rejected_calls_return_their_in_flight_slot() {
    let clock = Arc::new(ManualClock::new());
    let (dispatcher, _release) = slow_dispatcher(clock);

    // 入场先计数、再过闸门：被拒绝的调用必须立即归还计数，否则重启后的
    // 排水会被幽灵在途卡住。
    for _ in 0..3 {
        let error = dispatcher
            .invoke_unary(RequestMeta::new("echo"), Bytes::new(), Cancellation::new())
            .await
            .unwrap_err();
        assert_eq!(error.code(), codes::DISPATCHER_NOT_RUNNING);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    // 拒绝不留残余：随后的启动、调用与排空停机一切如常。
    dispatcher.start(ctx()).await.unwrap();
    dispatcher
        .invoke_unary(RequestMeta::new("echo"), Bytes::new(), Cancellation::new())
        .await
        .unwrap();
    assert_eq!(dispatcher.in_flight(), 0);
    let report = dispatcher.stop(ctx()).await.unwrap();
    assert!(report.drained);
}

#[tokio::test]
async fn restart_after_stop_accepts_calls_again() {
    let clock = Arc::new(ManualClock::new());
    let (dispatcher, _release) = slow_dispatcher(clock);
    dispatcher.start(ctx()).await.unwrap();
    dispatcher.stop(ctx()).await.unwrap();

    dispatcher.start(ctx()).await.unwrap();
    let response = dispatcher
        .invoke_unary(
            RequestMeta::new("Echo"),
            Bytes::from_static(b"again"),
            Cancellation::new(),
        )
        .await
        .unwrap();
    assert_eq!(response, Bytes::from_static(b"again"));
}
