//! 单调时钟与等待原语
//!
//! 所有节拍计算都以微秒为单位的单调时间进行。
//! `ManualClock` 用于离线模拟，sleep 只推进虚拟时间。

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// 单调时钟（微秒）
///
/// 只在驱动节拍的线程上使用
pub trait Clock {
    /// 当前单调时间（µs）
    fn now_us(&self) -> u64;

    /// 阻塞睡眠
    fn sleep_us(&self, us: u64);

    /// 让出 CPU（忙等轮询使用）
    fn yield_now(&self);
}

/// 基于 `Instant` 的系统单调时钟
#[derive(Clone, Copy, Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    fn sleep_us(&self, us: u64) {
        std::thread::sleep(Duration::from_micros(us));
    }

    #[inline]
    fn yield_now(&self) {
        std::thread::yield_now();
    }
}

/// 手动推进的虚拟时钟
///
/// clone 出的副本共享同一时间，测试可在 Pacer 外部推进时间。
/// `sleep_us` 精确推进请求的时长，`yield_now` 推进 `yield_step_us`。
#[derive(Clone, Debug)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
    yield_step_us: u64,
}

impl ManualClock {
    /// 默认每次 yield 推进 50µs
    pub fn new(start_us: u64) -> Self {
        Self::with_yield_step(start_us, 50)
    }

    pub fn with_yield_step(start_us: u64, yield_step_us: u64) -> Self {
        Self {
            now: Rc::new(Cell::new(start_us)),
            yield_step_us: yield_step_us.max(1),
        }
    }

    pub fn advance(&self, us: u64) {
        self.now.set(self.now.get() + us);
    }

    pub fn set(&self, us: u64) {
        self.now.set(us);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.now.get()
    }

    fn sleep_us(&self, us: u64) {
        self.advance(us);
    }

    fn yield_now(&self) {
        self.advance(self.yield_step_us);
    }
}

/// 空闲调度优先级守卫
///
/// RAII：创建时把当前线程切到 SCHED_IDLE，Drop 时恢复原策略。
/// 忙等期间不抢占其他线程。非 Linux 平台为空操作。
pub struct IdlePriorityGuard {
    #[cfg(target_os = "linux")]
    saved_policy: Option<libc::c_int>,
}

impl IdlePriorityGuard {
    #[cfg(target_os = "linux")]
    pub fn enter() -> Self {
        let param = libc::sched_param { sched_priority: 0 };
        let policy = unsafe { libc::sched_getscheduler(0) };
        if policy < 0 {
            log::debug!("sched_getscheduler failed, staying at normal priority");
            return Self { saved_policy: None };
        }

        let result = unsafe { libc::sched_setscheduler(0, libc::SCHED_IDLE, &param) };
        if result == 0 {
            Self {
                saved_policy: Some(policy),
            }
        } else {
            log::debug!("sched_setscheduler(SCHED_IDLE) failed, busy-waiting at normal priority");
            Self { saved_policy: None }
        }
    }

    #[cfg(not(target_os = "linux"))]
    pub fn enter() -> Self {
        Self {}
    }

    #[cfg(target_os = "linux")]
    fn restore(&mut self) {
        if let Some(policy) = self.saved_policy.take() {
            let param = libc::sched_param { sched_priority: 0 };
            let result = unsafe { libc::sched_setscheduler(0, policy, &param) };
            if result != 0 {
                log::warn!("Failed to restore scheduler policy {}", policy);
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn restore(&mut self) {}
}

impl Drop for IdlePriorityGuard {
    fn drop(&mut self) {
        self.restore();
    }
}
