//! 哈希桶
//!
//! 每个桶保存块号哈希到该桶的缓冲块。链上的每一项记录一个缓冲块的
//! 下标和元数据（块标识、引用计数、最近使用时间），元数据随链成员关系
//! 一起移动，因此始终由缓冲块当前所在桶的锁保护。

use crate::types::BlockId;
use alloc::vec::Vec;

/// 链上一个缓冲块的元数据
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotMeta {
    /// 缓冲池下标
    pub(crate) slot: usize,
    /// 当前绑定的块
    pub(crate) block: BlockId,
    /// 引用计数：未释放的持有 + 固定次数
    pub(crate) refcnt: u32,
    /// 其中由 pin 贡献的部分
    pub(crate) pins: u32,
    /// 最近一次获取或释放的时间戳
    pub(crate) last_used: u64,
}

impl SlotMeta {
    pub(crate) const fn new(slot: usize, block: BlockId) -> Self {
        Self {
            slot,
            block,
            refcnt: 0,
            pins: 0,
            last_used: 0,
        }
    }

    #[inline]
    pub(crate) fn is_free(&self) -> bool {
        self.refcnt == 0
    }
}

/// 哈希桶
pub(crate) struct Bucket {
    chain: Vec<SlotMeta>,
}

impl Bucket {
    /// 预留 `capacity` 项，链长不会超过缓冲池大小，插入时不再分配内存
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            chain: Vec::with_capacity(capacity),
        }
    }

    /// 按块标识查找
    pub(crate) fn find_mut(&mut self, block: BlockId) -> Option<&mut SlotMeta> {
        self.chain.iter_mut().find(|meta| meta.block == block)
    }

    /// 按缓冲池下标查找
    pub(crate) fn slot_mut(&mut self, slot: usize) -> Option<&mut SlotMeta> {
        self.chain.iter_mut().find(|meta| meta.slot == slot)
    }

    /// 缓冲块在链上的位置
    pub(crate) fn position(&self, slot: usize) -> Option<usize> {
        self.chain.iter().position(|meta| meta.slot == slot)
    }

    pub(crate) fn get(&self, pos: usize) -> &SlotMeta {
        &self.chain[pos]
    }

    pub(crate) fn get_mut(&mut self, pos: usize) -> &mut SlotMeta {
        &mut self.chain[pos]
    }

    /// 本桶中最久未使用的空闲缓冲块的位置
    pub(crate) fn victim(&self) -> Option<usize> {
        self.chain
            .iter()
            .enumerate()
            .filter(|(_, meta)| meta.is_free())
            .min_by_key(|(_, meta)| meta.last_used)
            .map(|(pos, _)| pos)
    }

    /// 挂入链
    pub(crate) fn insert(&mut self, meta: SlotMeta) {
        debug_assert!(self.position(meta.slot).is_none());
        self.chain.push(meta);
    }

    /// 从链上摘下
    pub(crate) fn remove(&mut self, pos: usize) -> SlotMeta {
        self.chain.swap_remove(pos)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &SlotMeta> {
        self.chain.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.chain.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(slot: usize, blockno: u32, refcnt: u32, last_used: u64) -> SlotMeta {
        SlotMeta {
            slot,
            block: BlockId::new(0, blockno),
            refcnt,
            pins: 0,
            last_used,
        }
    }

    #[test]
    fn test_find() {
        let mut bucket = Bucket::with_capacity(4);
        bucket.insert(meta(0, 10, 0, 0));
        bucket.insert(meta(3, 20, 1, 0));

        assert_eq!(bucket.find_mut(BlockId::new(0, 20)).map(|m| m.slot), Some(3));
        assert!(bucket.find_mut(BlockId::new(1, 20)).is_none());
        assert_eq!(bucket.slot_mut(0).map(|m| m.block.blockno), Some(10));
        assert_eq!(bucket.position(3), Some(1));
        assert_eq!(bucket.position(7), None);
    }

    #[test]
    fn test_victim_is_least_recently_used_free() {
        let mut bucket = Bucket::with_capacity(4);
        bucket.insert(meta(0, 10, 0, 30));
        bucket.insert(meta(1, 11, 2, 5));
        bucket.insert(meta(2, 12, 0, 20));
        bucket.insert(meta(3, 13, 0, 40));

        // 槽位 1 最旧但仍被引用
        let pos = bucket.victim().unwrap();
        assert_eq!(bucket.get(pos).slot, 2);
    }

    #[test]
    fn test_no_victim_when_all_referenced() {
        let mut bucket = Bucket::with_capacity(2);
        assert!(bucket.victim().is_none());

        bucket.insert(meta(0, 10, 1, 0));
        bucket.insert(meta(1, 11, 3, 0));
        assert!(bucket.victim().is_none());
    }

    #[test]
    fn test_remove_and_insert() {
        let mut src = Bucket::with_capacity(3);
        let mut dst = Bucket::with_capacity(3);
        src.insert(meta(0, 10, 0, 0));
        src.insert(meta(1, 11, 0, 0));
        src.insert(meta(2, 12, 0, 0));

        let pos = src.position(0).unwrap();
        let moved = src.remove(pos);
        dst.insert(moved);

        assert_eq!(src.len(), 2);
        assert_eq!(dst.len(), 1);
        assert!(src.position(0).is_none());
        assert_eq!(dst.position(0), Some(0));
        assert_eq!(src.iter().map(|m| m.slot).sum::<usize>(), 3);
        dst.get_mut(0).refcnt = 1;
        assert!(!dst.get(0).is_free());
    }
}
