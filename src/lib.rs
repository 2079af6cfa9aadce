//! bcache_core: 内核块缓存
//!
//! 在内存中缓存固定大小的磁盘块，供多个并发调用者共享：
//! - 重复读取直接由内存提供，减少设备 I/O
//! - 同一块同一时刻只允许一个调用者使用，上层（文件系统、日志）看到一致的内容
//! - 任意 `(dev, blockno)` 在缓存中至多有一份副本
//! - 不相关的块可以并行查找和驱逐
//!
//! # 示例
//!
//! ```rust,ignore
//! use bcache_core::{BufferCache, RamDisk, TickClock, Result};
//!
//! fn main() -> Result<()> {
//!     let cache: BufferCache<_, _> = BufferCache::new(RamDisk::new(2000), TickClock::new());
//!
//!     let mut buf = cache.bread(1, 33)?;
//!     buf[0] = 0x42;
//!     buf.write()?;
//!     buf.release();
//!
//!     Ok(())
//! }
//! ```
//!
//! # 模块结构
//!
//! - [`error`] - 错误类型定义
//! - [`consts`] - 常量定义
//! - [`types`] - 块标识
//! - [`block`] - 块设备抽象
//! - [`clock`] - 时间戳服务
//! - [`cache`] - 块缓存

#![no_std]
#![deny(unsafe_code)]
#![warn(missing_docs)]

extern crate alloc;

#[cfg(any(test, feature = "std"))]
extern crate std;

// ===== 核心模块 =====

/// 错误处理
pub mod error;

/// 常量定义
pub mod consts;

/// 块标识
pub mod types;

/// 块设备抽象
pub mod block;

/// 时间戳服务
pub mod clock;

/// 块缓存
pub mod cache;

// ===== 公共导出 =====

// 错误处理
pub use error::{Error, ErrorKind, Result};

// 常量
pub use consts::{BSIZE, NBUF, NBUF_BUCKETS};

// 块标识
pub use types::BlockId;

// 块设备
pub use block::{BlockDevice, RamDisk};

// 时钟
pub use clock::{Clock, ManualClock, TickClock};
#[cfg(feature = "std")]
pub use clock::InstantClock;

// 缓存
pub use cache::{
    BufFlags, BufGuard, BufferCache, CacheConfig, CacheStats, DefaultRawMutex, EvictionPolicy, SlotInfo,
};
