//! 可注入时间源：生产路径走系统时钟，测试路径走手动推进的虚拟时钟。
//!
//! # 设计背景（Why）
//! - 熔断窗口、对等体获取的重试切片与停机排水轮询全部依赖时间；若直接读取
//!   墙钟，相关行为在 CI 中不可复现；
//! - 通过 [`Clock`] 注入时间源后，测试以 [`ManualClock::advance`] 精确推进，
//!   断言不再依赖真实睡眠。
//!
//! # 逻辑解析（How）
//! - [`SystemClock`] 的 `sleep` 以独立线程定时并唤醒 waker，不绑定任何异步
//!   运行时；
//! - [`ManualClock`] 维护“已推进时长 + 睡眠者表”，`advance` 将到期睡眠者的
//!   waker 逐一唤醒，Future 在下次轮询时观察到到期并返回就绪。
//!
//! # 风险提示（Trade-offs）
//! - `SystemClock` 为每次睡眠支付一个线程，适合低频的退避/排水场景；若未来
//!   出现高频定时需求，应引入时间轮替代。

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// 时钟睡眠返回的 Future 别名。
pub type Sleep = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// 时间源抽象：读取当前时刻并产生可等待的睡眠。
///
/// # 契约说明（What）
/// - `now` 必须单调不减；
/// - `sleep` 返回的 Future 在时长耗尽后进入就绪，并负责唤醒登记的 waker；
/// - 实现必须线程安全，同一实例会被注册中心、熔断器与分发器并发共享。
pub trait Clock: Send + Sync + 'static {
    /// 当前时刻。
    fn now(&self) -> Instant;

    /// 睡眠指定时长。
    fn sleep(&self, duration: Duration) -> Sleep;
}

/// 基于系统时间的默认时钟。
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl SystemClock {
    /// 构造系统时钟。
    pub const fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> Sleep {
        if duration.is_zero() {
            return Box::pin(std::future::ready(()));
        }
        Box::pin(ThreadSleep::new(duration))
    }
}

struct ThreadSleepShared {
    done: AtomicBool,
    waker: Mutex<Option<Waker>>,
}

/// 线程定时睡眠：首次轮询时派生计时线程，到期后置位并唤醒。
struct ThreadSleep {
    shared: Arc<ThreadSleepShared>,
    duration: Duration,
    spawned: bool,
}

impl ThreadSleep {
    fn new(duration: Duration) -> Self {
        Self {
            shared: Arc::new(ThreadSleepShared {
                done: AtomicBool::new(false),
                waker: Mutex::new(None),
            }),
            duration,
            spawned: false,
        }
    }
}

impl Future for ThreadSleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.shared.done.load(Ordering::Acquire) {
            return Poll::Ready(());
        }
        *this.shared.waker.lock() = Some(cx.waker().clone());
        if !this.spawned {
            this.spawned = true;
            let shared = Arc::clone(&this.shared);
            let duration = this.duration;
            std::thread::spawn(move || {
                std::thread::sleep(duration);
                shared.done.store(true, Ordering::Release);
                if let Some(waker) = shared.waker.lock().take() {
                    waker.wake();
                }
            });
        }
        // 计时线程可能在登记 waker 的间隙完成，补一次检查避免错失唤醒。
        if this.shared.done.load(Ordering::Acquire) {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

struct ManualSleeper {
    id: u64,
    due: Duration,
    waker: Option<Waker>,
}

struct ManualState {
    elapsed: Duration,
    next_id: u64,
    sleepers: Vec<ManualSleeper>,
}

struct ManualClockInner {
    origin: Instant,
    state: Mutex<ManualState>,
}

/// 手动推进的虚拟时钟。
///
/// # 契约说明（What）
/// - `now` = 构造时刻 + 已推进时长，仅随 [`advance`](ManualClock::advance)
///   前进；
/// - `advance` 唤醒所有到期睡眠者；未到期者保持等待；
/// - 克隆共享同一内部状态，可同时注入多个组件。
#[derive(Clone)]
pub struct ManualClock {
    inner: Arc<ManualClockInner>,
}

impl ManualClock {
    /// 构造虚拟时钟，初始已推进时长为零。
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ManualClockInner {
                origin: Instant::now(),
                state: Mutex::new(ManualState {
                    elapsed: Duration::ZERO,
                    next_id: 0,
                    sleepers: Vec::new(),
                }),
            }),
        }
    }

    /// 推进虚拟时间并唤醒到期的睡眠者。
    ///
    /// # 逻辑解析（How）
    /// 1. 锁内累加已推进时长，摘取到期睡眠者的 waker；
    /// 2. 释放锁后再逐一唤醒，避免 waker 回调重入造成死锁。
    pub fn advance(&self, delta: Duration) {
        let wakers: Vec<Waker> = {
            let mut state = self.inner.state.lock();
            state.elapsed = state.elapsed.saturating_add(delta);
            let elapsed = state.elapsed;
            state
                .sleepers
                .iter_mut()
                .filter(|sleeper| sleeper.due <= elapsed)
                .filter_map(|sleeper| sleeper.waker.take())
                .collect()
        };
        for waker in wakers {
            waker.wake();
        }
    }

    /// 读取已推进的总时长。
    pub fn elapsed(&self) -> Duration {
        self.inner.state.lock().elapsed
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.inner.origin + self.inner.state.lock().elapsed
    }

    fn sleep(&self, duration: Duration) -> Sleep {
        let (id, due) = {
            let mut state = self.inner.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            (id, state.elapsed.saturating_add(duration))
        };
        Box::pin(ManualSleep {
            inner: Arc::clone(&self.inner),
            id,
            due,
        })
    }
}

/// 虚拟时钟的睡眠 Future：首次挂起时登记进睡眠者表。
struct ManualSleep {
    inner: Arc<ManualClockInner>,
    id: u64,
    due: Duration,
}

impl Future for ManualSleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let mut state = this.inner.state.lock();
        if state.elapsed >= this.due {
            let id = this.id;
            state.sleepers.retain(|sleeper| sleeper.id != id);
            return Poll::Ready(());
        }
        match state
            .sleepers
            .iter_mut()
            .find(|sleeper| sleeper.id == this.id)
        {
            Some(sleeper) => sleeper.waker = Some(cx.waker().clone()),
            None => state.sleepers.push(ManualSleeper {
                id: this.id,
                due: this.due,
                waker: Some(cx.waker().clone()),
            }),
        }
        Poll::Pending
    }
}

impl Drop for ManualSleep {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        let id = self.id;
        state.sleepers.retain(|sleeper| sleeper.id != id);
    }
}
