//! 缓冲块结构
//!
//! 每个缓冲块（slot）在缓存构造时创建，之后只会被重新绑定到别的块，
//! 不会被释放。块内容由一把独占的内容锁保护，[`BufGuard`] 的存在
//! 即证明调用者持有这把锁。
//!
//! 内容锁的实现由类型参数 `R: lock_api::RawMutex` 决定，默认是
//! `spin::Mutex<()>`。有调度器的内核应换成会让出 CPU 的睡眠锁，
//! 因为调用者会在持锁期间做磁盘 I/O。

use super::bcache::BufferCache;
use crate::block::BlockDevice;
use crate::clock::Clock;
use crate::consts::BSIZE;
use crate::error::Result;
use crate::types::BlockId;
use bitflags::bitflags;
use core::ops::{Deref, DerefMut};
use lock_api::{Mutex, MutexGuard, RawMutex};

bitflags! {
    /// 缓冲块标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BufFlags: u8 {
        /// 内容与磁盘上的块一致
        const VALID = 0x01;
        /// 内容在上次读写磁盘之后被修改过
        const DIRTY = 0x02;
    }
}

/// 受内容锁保护的缓冲块数据
pub(crate) struct BufData {
    /// 数据所属的块
    pub(crate) block: BlockId,
    /// 块状态标志
    pub(crate) flags: BufFlags,
    /// 块数据
    pub(crate) data: [u8; BSIZE],
}

/// 内容锁的默认实现
pub type DefaultRawMutex = spin::Mutex<()>;

/// 缓冲池中的一个缓冲块
pub(crate) struct BufSlot<R> {
    pub(crate) content: Mutex<R, BufData>,
}

impl<R: RawMutex> BufSlot<R> {
    pub(crate) fn new(block: BlockId) -> Self {
        Self {
            content: Mutex::new(BufData {
                block,
                flags: BufFlags::empty(),
                data: [0u8; BSIZE],
            }),
        }
    }

    /// 把空闲缓冲块重新绑定到 `block`，清除 VALID
    ///
    /// 调用者持有该缓冲块所在桶的锁，且其引用计数为 0。引用计数归零前
    /// 内容锁已经释放，所以这里的 `try_lock` 不会失败，也不会阻塞。
    ///
    /// 返回被驱逐的内容是否有未写回的修改。
    pub(crate) fn rebind(&self, block: BlockId) -> bool {
        let Some(mut content) = self.content.try_lock() else {
            panic!("bget: content lock held on free buffer");
        };
        let unwritten = content.flags.contains(BufFlags::VALID | BufFlags::DIRTY);
        content.block = block;
        content.flags = BufFlags::empty();
        unwritten
    }
}

/// 对缓冲块的一次持有
///
/// 析构时把引用计数减一。它声明在 [`BufGuard`] 的内容锁之后，
/// 因此总是在内容锁释放之后才归还引用。
pub(crate) struct SlotHold<'a, D, C, const NBUF: usize, const NBUCKETS: usize, R>
where
    D: BlockDevice,
    C: Clock,
    R: RawMutex,
{
    pub(crate) cache: &'a BufferCache<D, C, NBUF, NBUCKETS, R>,
    pub(crate) slot: usize,
    pub(crate) block: BlockId,
}

impl<D, C, const NBUF: usize, const NBUCKETS: usize, R> Drop for SlotHold<'_, D, C, NBUF, NBUCKETS, R>
where
    D: BlockDevice,
    C: Clock,
    R: RawMutex,
{
    fn drop(&mut self) {
        self.cache.release_slot(self.slot, self.block);
    }
}

/// 已加锁的缓冲块
///
/// 由 [`BufferCache::bread`] 返回。持有期间：
/// - 该缓冲块不会被驱逐或重新绑定到其他块
/// - 其他调用者对同一块的 `bread` 会阻塞
///
/// 通过 `Deref`/`DerefMut` 访问块数据，可变访问会把缓冲块标记为脏。
/// 丢弃即释放（等价于 `brelse`），释放后不能再访问该缓冲块。
///
/// # 示例
///
/// ```rust,ignore
/// let mut buf = cache.bread(ROOTDEV, 33)?;
/// buf[0] = 0x42;
/// buf.write()?;      // bwrite
/// buf.pin();         // 保持常驻，供日志层稍后写回
/// buf.release();     // brelse
/// ```
pub struct BufGuard<'a, D, C, const NBUF: usize, const NBUCKETS: usize, R = DefaultRawMutex>
where
    D: BlockDevice,
    C: Clock,
    R: RawMutex,
{
    // 字段按声明顺序析构：先放内容锁，再归还引用
    content: MutexGuard<'a, R, BufData>,
    hold: SlotHold<'a, D, C, NBUF, NBUCKETS, R>,
}

impl<'a, D, C, const NBUF: usize, const NBUCKETS: usize, R> BufGuard<'a, D, C, NBUF, NBUCKETS, R>
where
    D: BlockDevice,
    C: Clock,
    R: RawMutex,
{
    pub(crate) fn new(
        cache: &'a BufferCache<D, C, NBUF, NBUCKETS, R>,
        slot: usize,
        content: MutexGuard<'a, R, BufData>,
    ) -> Self {
        let block = content.block;
        Self {
            content,
            hold: SlotHold { cache, slot, block },
        }
    }

    /// 块标识
    pub fn block(&self) -> BlockId {
        self.hold.block
    }

    /// 设备号
    pub fn dev(&self) -> u32 {
        self.hold.block.dev
    }

    /// 块号
    pub fn blockno(&self) -> u32 {
        self.hold.block.blockno
    }

    /// 缓冲块在缓冲池中的下标
    pub fn slot(&self) -> usize {
        self.hold.slot
    }

    /// 块状态标志
    pub fn flags(&self) -> BufFlags {
        self.content.flags
    }

    /// 内容是否与磁盘一致
    pub fn is_valid(&self) -> bool {
        self.content.flags.contains(BufFlags::VALID)
    }

    /// 内容是否被修改且尚未写回
    pub fn is_dirty(&self) -> bool {
        self.content.flags.contains(BufFlags::DIRTY)
    }

    /// 同步写回磁盘（bwrite）
    pub fn write(&mut self) -> Result<()> {
        let cache = self.hold.cache;
        cache.bwrite(self)
    }

    /// 固定缓冲块（bpin），使其在释放后仍保持常驻
    pub fn pin(&self) {
        self.hold.cache.pin(self)
    }

    /// 取消一次固定（bunpin）
    pub fn unpin(&self) {
        self.hold.cache.unpin(self)
    }

    /// 释放缓冲块（brelse）
    pub fn release(self) {
        drop(self);
    }

    pub(crate) fn cache(&self) -> &'a BufferCache<D, C, NBUF, NBUCKETS, R> {
        self.hold.cache
    }

    pub(crate) fn content(&self) -> &BufData {
        &self.content
    }

    pub(crate) fn content_mut(&mut self) -> &mut BufData {
        &mut self.content
    }
}

impl<D, C, const NBUF: usize, const NBUCKETS: usize, R> Deref for BufGuard<'_, D, C, NBUF, NBUCKETS, R>
where
    D: BlockDevice,
    C: Clock,
    R: RawMutex,
{
    type Target = [u8; BSIZE];

    fn deref(&self) -> &Self::Target {
        &self.content.data
    }
}

impl<D, C, const NBUF: usize, const NBUCKETS: usize, R> DerefMut for BufGuard<'_, D, C, NBUF, NBUCKETS, R>
where
    D: BlockDevice,
    C: Clock,
    R: RawMutex,
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.content.flags.insert(BufFlags::DIRTY);
        &mut self.content.data
    }
}

impl<D, C, const NBUF: usize, const NBUCKETS: usize, R> core::fmt::Debug for BufGuard<'_, D, C, NBUF, NBUCKETS, R>
where
    D: BlockDevice,
    C: Clock,
    R: RawMutex,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BufGuard")
            .field("block", &self.hold.block)
            .field("slot", &self.hold.slot)
            .field("flags", &self.content.flags)
            .finish()
    }
}
