//! 块缓存实现
//!
//! 固定数量的缓冲块通过按块号分片的哈希表寻址。
//!
//! # 锁层次
//!
//! ```text
//! evict_lock (全局，仅在未命中时获取)
//!   └─ buckets[i] (自旋锁，短持有；同时持有两个时按下标升序获取)
//!        └─ slots[j].content (内容锁，最后获取，可跨 I/O 持有)
//! ```
//!
//! 获取内容锁之前必须先释放所有桶锁和全局锁。命中路径只需要一个桶锁，
//! 不同桶中的块可以完全并行地查找和释放。
//!
//! # 不变量
//!
//! - 任意 `(dev, blockno)` 在整个缓冲池中至多绑定一个缓冲块
//! - 引用计数大于 0 的缓冲块不会被重新绑定，也不会离开它所在的桶
//! - 每个缓冲块恰好在一个桶的链上
//!
//! 新块只会在持有 `evict_lock` 时装入，因此两个线程不可能同时为同一个块
//! 各自分配一个缓冲块。

use super::bucket::{Bucket, SlotMeta};
use super::buffer::{BufFlags, BufGuard, BufSlot, DefaultRawMutex};
use crate::block::BlockDevice;
use crate::clock::Clock;
use crate::consts;
use crate::error::Result;
use crate::types::BlockId;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use lock_api::RawMutex;
use spin::{Mutex, MutexGuard};

/// 跨桶选择牺牲块的策略
///
/// 两种策略都先使用目标桶内的空闲缓冲块，只有目标桶内没有空闲缓冲块时
/// 才按 `target+1, target+2, …`（取模）的顺序查看其他桶。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// 查看所有桶，选最久未使用的空闲缓冲块
    #[default]
    LeastRecentlyUsed,
    /// 选第一个有空闲缓冲块的桶，取其中最久未使用的
    FirstFit,
}

/// 缓存配置
///
/// 缓冲池大小和桶数由类型参数在编译期确定，这里只有运行期行为。
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheConfig {
    /// 驱逐策略
    pub policy: EvictionPolicy,
}

/// 缓存统计信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// 命中次数
    pub hits: u64,
    /// 未命中次数
    pub misses: u64,
    /// 缓冲块被重新绑定的次数
    pub evictions: u64,
    /// 缓冲块跨桶迁移的次数
    pub relocations: u64,
    /// 物理读取次数
    pub device_reads: u64,
    /// 物理写入次数
    pub device_writes: u64,
}

impl CacheStats {
    /// 计算命中率
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    relocations: AtomicU64,
    device_reads: AtomicU64,
    device_writes: AtomicU64,
}

impl StatsCounters {
    #[inline]
    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            relocations: self.relocations.load(Ordering::Relaxed),
            device_reads: self.device_reads.load(Ordering::Relaxed),
            device_writes: self.device_writes.load(Ordering::Relaxed),
        }
    }
}

/// 某一时刻缓冲块的元数据
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotInfo {
    /// 缓冲池下标
    pub slot: usize,
    /// 绑定的块
    pub block: BlockId,
    /// 引用计数
    pub refcnt: u32,
    /// 固定次数
    pub pins: u32,
    /// 最近使用时间戳
    pub last_used: u64,
}

impl SlotInfo {
    fn from_meta(meta: &SlotMeta) -> Self {
        Self {
            slot: meta.slot,
            block: meta.block,
            refcnt: meta.refcnt,
            pins: meta.pins,
            last_used: meta.last_used,
        }
    }
}

/// 块缓存
///
/// # 类型参数
///
/// * `D` - 块设备
/// * `C` - 时间戳来源
/// * `NBUF` - 缓冲块数量
/// * `NBUCKETS` - 哈希桶数量
/// * `R` - 内容锁的实现，默认自旋；内核中应使用睡眠锁
///
/// 桶锁和全局驱逐锁只在短小的临界区内持有，始终是自旋锁。
///
/// # 使用约定
///
/// - 同一线程不能在持有某块的 [`BufGuard`] 时再次 `bread` 同一块：
///   这次调用永远不会返回。默认的自旋内容锁会无声地空转，换成睡眠锁
///   则是死锁
/// - 同时持有的块数不能超过 `NBUF`，否则缓冲池耗尽并 panic
///
/// # 示例
///
/// ```rust,ignore
/// use bcache_core::{BufferCache, RamDisk, TickClock};
///
/// let cache: BufferCache<_, _> = BufferCache::new(RamDisk::new(1024), TickClock::new());
///
/// let mut buf = cache.bread(1, 46)?;
/// buf[..4].copy_from_slice(&7u32.to_le_bytes());
/// cache.bwrite(&mut buf)?;
/// cache.brelse(buf);
/// ```
pub struct BufferCache<
    D,
    C,
    const NBUF: usize = { consts::NBUF },
    const NBUCKETS: usize = { consts::NBUF_BUCKETS },
    R = DefaultRawMutex,
> {
    /// 块设备
    device: D,
    /// 时间戳来源
    clock: C,
    /// 运行期配置
    config: CacheConfig,
    /// 全局驱逐锁：装入新块（查找牺牲块、跨桶迁移）时持有
    evict_lock: Mutex<()>,
    /// 哈希桶
    buckets: [Mutex<Bucket>; NBUCKETS],
    /// 缓冲池
    slots: [BufSlot<R>; NBUF],
    /// 引用计数为 0 的缓冲块数量，只在持有对应桶锁时修改
    free: AtomicUsize,
    /// 统计信息
    stats: StatsCounters,
}

impl<D, C, const NBUF: usize, const NBUCKETS: usize, R> BufferCache<D, C, NBUF, NBUCKETS, R>
where
    D: BlockDevice,
    C: Clock,
    R: RawMutex,
{
    /// 使用默认配置创建块缓存
    pub fn new(device: D, clock: C) -> Self {
        Self::with_config(device, clock, CacheConfig::default())
    }

    /// 创建块缓存
    ///
    /// 缓冲块 `i` 初始绑定到 `(0, i)`，内容无效，挂在桶 `i % NBUCKETS` 上。
    pub fn with_config(device: D, clock: C, config: CacheConfig) -> Self {
        assert!(NBUF > 0, "bcache: empty buffer pool");
        assert!(NBUCKETS > 0, "bcache: no buckets");
        assert!(NBUF <= u32::MAX as usize, "bcache: buffer pool too large");

        let slots = core::array::from_fn(|i| BufSlot::new(BlockId::new(0, i as u32)));
        let mut chains: [Bucket; NBUCKETS] = core::array::from_fn(|_| Bucket::with_capacity(NBUF));
        for i in 0..NBUF {
            let block = BlockId::new(0, i as u32);
            chains[block.bucket(NBUCKETS)].insert(SlotMeta::new(i, block));
        }

        log::debug!(
            "[BCACHE] init: {} buffers, {} buckets, policy={:?}",
            NBUF,
            NBUCKETS,
            config.policy
        );

        Self {
            device,
            clock,
            config,
            evict_lock: Mutex::new(()),
            buckets: chains.map(Mutex::new),
            slots,
            free: AtomicUsize::new(NBUF),
            stats: StatsCounters::default(),
        }
    }

    /// 读取块
    ///
    /// 返回加锁的缓冲块，其内容保证与磁盘一致：如果缓冲块无效，
    /// 先同步地从设备读入。
    ///
    /// # 错误
    ///
    /// 设备读取失败时返回错误，此前取得的持有会被释放，缓冲块保持无效。
    pub fn bread(&self, dev: u32, blockno: u32) -> Result<BufGuard<'_, D, C, NBUF, NBUCKETS, R>> {
        let mut buf = self.bget(BlockId::new(dev, blockno));
        if !buf.is_valid() {
            let block = buf.block();
            let content = buf.content_mut();
            if let Err(e) = self.device.read_block(block, &mut content.data) {
                log::error!("[BCACHE] read of block {} failed: {}", block, e);
                return Err(e);
            }
            content.flags.insert(BufFlags::VALID);
            content.flags.remove(BufFlags::DIRTY);
            StatsCounters::inc(&self.stats.device_reads);
        }
        Ok(buf)
    }

    /// 把缓冲块内容同步写回磁盘
    ///
    /// 写入后刷新设备，返回时数据已经持久化。不释放内容锁，不改变引用计数。
    ///
    /// # 错误
    ///
    /// 写入或刷新失败时返回错误，缓冲块保持原来的标志。
    pub fn bwrite(&self, buf: &mut BufGuard<'_, D, C, NBUF, NBUCKETS, R>) -> Result<()> {
        self.check_owner(buf, "bwrite");
        let block = buf.block();
        self.device.write_block(block, &buf.content().data)?;
        self.device.flush()?;
        let content = buf.content_mut();
        content.flags.insert(BufFlags::VALID);
        content.flags.remove(BufFlags::DIRTY);
        StatsCounters::inc(&self.stats.device_writes);
        log::trace!("[BCACHE] bwrite block {}", block);
        Ok(())
    }

    /// 释放缓冲块
    ///
    /// 先释放内容锁，再把引用计数减一。引用计数归零后缓冲块立即可被驱逐。
    pub fn brelse(&self, buf: BufGuard<'_, D, C, NBUF, NBUCKETS, R>) {
        self.check_owner(&buf, "brelse");
        drop(buf);
    }

    /// 固定缓冲块：引用计数加一，不涉及内容锁
    ///
    /// 被固定的块在释放后仍不会被驱逐，直到对应的 [`unpin`](Self::unpin)。
    pub fn pin(&self, buf: &BufGuard<'_, D, C, NBUF, NBUCKETS, R>) {
        self.check_owner(buf, "bpin");
        let mut bucket = self.buckets[buf.block().bucket(NBUCKETS)].lock();
        let meta = Self::entry(&mut bucket, buf.slot(), "bpin");
        meta.refcnt += 1;
        meta.pins += 1;
        log::trace!("[BCACHE] pin block {} refcnt={}", meta.block, meta.refcnt);
    }

    /// 取消固定：引用计数减一，不涉及内容锁
    ///
    /// # Panics
    ///
    /// 该块没有未取消的固定时 panic。
    pub fn unpin(&self, buf: &BufGuard<'_, D, C, NBUF, NBUCKETS, R>) {
        self.check_owner(buf, "bunpin");
        let mut bucket = self.buckets[buf.block().bucket(NBUCKETS)].lock();
        let meta = Self::entry(&mut bucket, buf.slot(), "bunpin");
        if meta.pins == 0 {
            panic!("bunpin: block {} not pinned", meta.block);
        }
        // 调用者仍持有该块，引用计数不会降到 0
        meta.pins -= 1;
        meta.refcnt -= 1;
        log::trace!("[BCACHE] unpin block {} refcnt={}", meta.block, meta.refcnt);
    }

    /// 查找或分配缓冲块，返回时已持有内容锁
    fn bget(&self, block: BlockId) -> BufGuard<'_, D, C, NBUF, NBUCKETS, R> {
        let target = block.bucket(NBUCKETS);

        let hit = {
            let mut bucket = self.buckets[target].lock();
            self.touch(&mut bucket, block)
        };
        let slot = match hit {
            Some(slot) => {
                StatsCounters::inc(&self.stats.hits);
                log::trace!("[BCACHE] bget block {} HIT buffer {}", block, slot);
                slot
            }
            None => {
                StatsCounters::inc(&self.stats.misses);
                log::debug!("[BCACHE] bget block {} MISS", block);
                self.allocate(target, block)
            }
        };

        // 所有桶锁与全局锁都已释放
        let content = self.slots[slot].content.lock();
        debug_assert_eq!(content.block, block);
        BufGuard::new(self, slot, content)
    }

    /// 命中时增加引用计数并返回缓冲块下标
    fn touch(&self, bucket: &mut Bucket, block: BlockId) -> Option<usize> {
        let meta = bucket.find_mut(block)?;
        if meta.is_free() {
            self.free.fetch_sub(1, Ordering::SeqCst);
        }
        meta.refcnt += 1;
        meta.last_used = self.clock.now();
        Some(meta.slot)
    }

    /// 未命中：在全局驱逐锁下为 `block` 绑定一个空闲缓冲块
    fn allocate(&self, target: usize, block: BlockId) -> usize {
        let _evict = self.evict_lock.lock();

        {
            let mut bucket = self.buckets[target].lock();
            // 等待驱逐锁期间可能已被其他线程装入
            if let Some(slot) = self.touch(&mut bucket, block) {
                log::trace!("[BCACHE] block {} loaded concurrently into buffer {}", block, slot);
                return slot;
            }
            if let Some(pos) = bucket.victim() {
                let meta = bucket.get_mut(pos);
                self.claim(meta, block);
                return meta.slot;
            }
        }

        loop {
            let Some((from, slot)) = self.find_victim(target) else {
                // 扫描期间别处可能有缓冲块被释放
                if self.free.load(Ordering::SeqCst) > 0 {
                    log::trace!("[BCACHE] buffer freed during scan, rescanning");
                    continue;
                }
                log::error!(
                    "[BCACHE] no free buffer for block {}: all {} buffers referenced",
                    block,
                    NBUF
                );
                panic!("bget: no buffers");
            };

            if from == target {
                let mut bucket = self.buckets[target].lock();
                match bucket.position(slot) {
                    Some(pos) if bucket.get(pos).is_free() => {
                        let meta = bucket.get_mut(pos);
                        self.claim(meta, block);
                        return meta.slot;
                    }
                    _ => continue,
                }
            }

            let (mut src, mut dst) = self.lock_pair(from, target);
            let Some(pos) = src.position(slot) else {
                panic!("bget: buffer {} left bucket {} during eviction", slot, from);
            };
            if !src.get(pos).is_free() {
                // 查找与加锁之间被命中，重新选择
                log::trace!("[BCACHE] victim buffer {} taken, rescanning", slot);
                continue;
            }

            let mut meta = src.remove(pos);
            self.claim(&mut meta, block);
            dst.insert(meta);
            StatsCounters::inc(&self.stats.relocations);
            log::debug!(
                "[BCACHE] moved buffer {} from bucket {} to bucket {}",
                slot,
                from,
                target
            );
            return slot;
        }
    }

    /// 查找牺牲块，返回 `(桶下标, 缓冲池下标)`
    ///
    /// 先看目标桶，有空闲缓冲块就直接用它；再按距离查看其他桶。
    /// 每次只持有一个桶锁。
    fn find_victim(&self, target: usize) -> Option<(usize, usize)> {
        let mut best: Option<(usize, usize, u64)> = None;
        for distance in 0..NBUCKETS {
            let idx = (target + distance) % NBUCKETS;
            let bucket = self.buckets[idx].lock();
            let Some(pos) = bucket.victim() else {
                continue;
            };
            let meta = bucket.get(pos);
            if distance == 0 {
                return Some((idx, meta.slot));
            }
            if best.map_or(true, |(_, _, last_used)| meta.last_used < last_used) {
                best = Some((idx, meta.slot, meta.last_used));
            }
            if self.config.policy == EvictionPolicy::FirstFit {
                break;
            }
        }
        best.map(|(idx, slot, _)| (idx, slot))
    }

    /// 按下标升序锁住两个不同的桶，返回 `(from, to)` 的锁
    fn lock_pair(
        &self,
        from: usize,
        to: usize,
    ) -> (MutexGuard<'_, Bucket>, MutexGuard<'_, Bucket>) {
        debug_assert_ne!(from, to);
        if from < to {
            let src = self.buckets[from].lock();
            let dst = self.buckets[to].lock();
            (src, dst)
        } else {
            let dst = self.buckets[to].lock();
            let src = self.buckets[from].lock();
            (src, dst)
        }
    }

    /// 把空闲缓冲块重新绑定到 `block`，调用者持有其所在桶的锁
    fn claim(&self, meta: &mut SlotMeta, block: BlockId) {
        assert!(
            meta.is_free(),
            "bget: evicting referenced buffer {} (refcnt={})",
            meta.slot,
            meta.refcnt
        );
        let evicted = meta.block;
        if self.slots[meta.slot].rebind(block) {
            log::warn!(
                "[BCACHE] evicting block {} with modifications never written",
                evicted
            );
        }
        self.free.fetch_sub(1, Ordering::SeqCst);
        meta.block = block;
        meta.refcnt = 1;
        meta.pins = 0;
        meta.last_used = self.clock.now();
        StatsCounters::inc(&self.stats.evictions);
        log::debug!(
            "[BCACHE] buffer {} rebound {} -> {}",
            meta.slot,
            evicted,
            block
        );
    }

    /// 归还一次持有，由 [`BufGuard`] 析构时调用
    pub(crate) fn release_slot(&self, slot: usize, block: BlockId) {
        let mut bucket = self.buckets[block.bucket(NBUCKETS)].lock();
        let meta = Self::entry(&mut bucket, slot, "brelse");
        meta.refcnt = match meta.refcnt.checked_sub(1) {
            Some(refcnt) => refcnt,
            None => panic!("brelse: buffer {} refcnt underflow", slot),
        };
        if meta.is_free() {
            self.free.fetch_add(1, Ordering::SeqCst);
        }
        meta.last_used = self.clock.now();
        log::trace!("[BCACHE] brelse block {} refcnt={}", block, meta.refcnt);
    }

    fn entry<'b>(bucket: &'b mut Bucket, slot: usize, op: &str) -> &'b mut SlotMeta {
        match bucket.slot_mut(slot) {
            Some(meta) => meta,
            None => panic!("{}: buffer {} not in its bucket", op, slot),
        }
    }

    fn check_owner(&self, buf: &BufGuard<'_, D, C, NBUF, NBUCKETS, R>, op: &str) {
        assert!(
            core::ptr::eq(buf.cache(), self),
            "{}: buffer belongs to another cache",
            op
        );
    }

    /// 当前引用计数为 0、可被驱逐的缓冲块数量
    pub fn free_count(&self) -> usize {
        self.free.load(Ordering::SeqCst)
    }

    /// 获取缓存统计信息
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// 各个桶上的缓冲块元数据
    ///
    /// 逐个加锁读取，不是整个表的原子快照；在没有并发操作时是精确的。
    pub fn snapshot(&self) -> Vec<Vec<SlotInfo>> {
        self.buckets
            .iter()
            .map(|bucket| bucket.lock().iter().map(SlotInfo::from_meta).collect())
            .collect()
    }

    /// 以 debug 级别输出所有桶的内容
    pub fn dump(&self) {
        for (idx, bucket) in self.buckets.iter().enumerate() {
            let bucket = bucket.lock();
            log::debug!("[BCACHE] bucket #{} ({} buffers)", idx, bucket.len());
            for meta in bucket.iter() {
                log::debug!(
                    "[BCACHE]   buffer {} block {} refcnt={} pins={} last_used={}",
                    meta.slot,
                    meta.block,
                    meta.refcnt,
                    meta.pins,
                    meta.last_used
                );
            }
        }
    }

    /// 获取块设备的引用
    pub fn device(&self) -> &D {
        &self.device
    }

    /// 获取时间戳来源的引用
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// 获取配置
    pub fn config(&self) -> CacheConfig {
        self.config
    }

    /// 缓冲块数量
    pub const fn capacity(&self) -> usize {
        NBUF
    }

    /// 哈希桶数量
    pub const fn bucket_count(&self) -> usize {
        NBUCKETS
    }
}

impl<D, C, const NBUF: usize, const NBUCKETS: usize, R> core::fmt::Debug
    for BufferCache<D, C, NBUF, NBUCKETS, R>
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BufferCache")
            .field("capacity", &NBUF)
            .field("buckets", &NBUCKETS)
            .field("config", &self.config)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}
