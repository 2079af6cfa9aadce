//! 块缓存模块
//!
//! 在内存中缓存固定大小的磁盘块，供文件系统和日志层共享。
//!
//! # 主要组件
//!
//! - [`BufferCache`] - 块缓存：固定的缓冲池 + 按块号分片的哈希桶
//! - [`BufGuard`] - 已加锁的缓冲块，持有即代表独占访问
//! - [`BufFlags`] - 缓冲块状态标志
//! - [`EvictionPolicy`] / [`CacheConfig`] - 驱逐策略配置
//! - [`CacheStats`] - 缓存统计信息
//!
//! # 接口约定
//!
//! | 操作      | 方法                                   |
//! |-----------|----------------------------------------|
//! | `bread`   | [`BufferCache::bread`]                 |
//! | `bwrite`  | [`BufferCache::bwrite`] / [`BufGuard::write`] |
//! | `brelse`  | [`BufferCache::brelse`] / 丢弃 `BufGuard` |
//! | `bpin`    | [`BufferCache::pin`] / [`BufGuard::pin`] |
//! | `bunpin`  | [`BufferCache::unpin`] / [`BufGuard::unpin`] |
//!
//! - 修改缓冲块内容后调用 `bwrite` 写回磁盘，缓存不会自行写回
//! - 释放后不能再使用缓冲块（由借用检查保证）
//! - 同一时刻只有一个调用者能使用某个缓冲块，不要长时间持有
//!
//! # 驱逐
//!
//! 只有引用计数为 0 的缓冲块可以被驱逐。未命中时先在目标桶内找空闲
//! 缓冲块，找不到再按固定顺序查看其他桶，并把选中的缓冲块迁移到目标桶。
//! 每一轮扫描都会重新查看目标桶。一轮扫描没有找到、但期间有缓冲块被
//! 释放时重新扫描；确实所有缓冲块都被引用时缓冲池耗尽，直接 panic。
//!
//! # 内容锁
//!
//! 内容锁可能跨磁盘 I/O 持有。默认使用 `spin::Mutex<()>`，
//! 有调度器的内核可以通过最后一个类型参数换成实现了
//! `lock_api::RawMutex` 的睡眠锁。
//!
//! # 内存分配要求
//!
//! 桶的链表使用 `alloc::vec::Vec`，需要用户提供全局分配器。
//! 链表在构造时预留容量，之后的查找、迁移不再分配内存。

mod bcache;
mod bucket;
mod buffer;

pub use bcache::{BufferCache, CacheConfig, CacheStats, EvictionPolicy, SlotInfo};
pub use buffer::{BufFlags, BufGuard, DefaultRawMutex};
