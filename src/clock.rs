//! 时间戳服务
//!
//! 缓存只用时间戳比较缓冲块的新旧（LRU），不需要墙上时间语义。
//! 时钟作为能力显式传给 [`BufferCache`](crate::cache::BufferCache)，
//! 测试中可以换成 [`ManualClock`] 得到确定的驱逐顺序。

use core::sync::atomic::{AtomicU64, Ordering};

/// 单调不减的时间戳来源
pub trait Clock {
    /// 当前时间戳
    fn now(&self) -> u64;
}

/// 计数器时钟
///
/// 每次调用 `now()` 返回一个严格递增的值，因此任意两次访问都能区分先后。
#[derive(Debug, Default)]
pub struct TickClock {
    ticks: AtomicU64,
}

impl TickClock {
    /// 创建从 0 开始的计数器时钟
    pub const fn new() -> Self {
        Self { ticks: AtomicU64::new(0) }
    }
}

impl Clock for TickClock {
    fn now(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::Relaxed)
    }
}

/// 手动时钟
///
/// 时间只在调用 [`ManualClock::set`] 或 [`ManualClock::advance`] 时变化。
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// 创建停在 `start` 的手动时钟
    pub const fn new(start: u64) -> Self {
        Self { now: AtomicU64::new(start) }
    }

    /// 设置当前时间，不允许回拨
    pub fn set(&self, now: u64) {
        self.now.fetch_max(now, Ordering::Relaxed);
    }

    /// 时间前进 `delta`
    pub fn advance(&self, delta: u64) {
        self.now.fetch_add(delta, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }
}

/// 基于 `std::time::Instant` 的时钟，单位为纳秒
#[cfg(feature = "std")]
#[derive(Debug)]
pub struct InstantClock {
    start: std::time::Instant,
}

#[cfg(feature = "std")]
impl InstantClock {
    /// 以当前时刻为零点创建时钟
    pub fn new() -> Self {
        Self { start: std::time::Instant::now() }
    }
}

#[cfg(feature = "std")]
impl Default for InstantClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Clock for InstantClock {
    fn now(&self) -> u64 {
        self.start.elapsed().as_nanos() as u64
    }
}

impl<T: Clock + ?Sized> Clock for &T {
    fn now(&self) -> u64 {
        (**self).now()
    }
}
