//! 内存块设备
//!
//! 纯内存实现的 [`BlockDevice`]，未写过的块读出来全为 0。

use super::device::BlockDevice;
use crate::consts::BSIZE;
use crate::error::{Error, ErrorKind, Result};
use crate::types::BlockId;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

/// 内存块设备
///
/// 每个块按 [`BlockId`] 单独存放，设备号不同的块互不影响。
/// 可以通过 [`RamDisk::fail_on`] 让某个块的 I/O 失败，用于模拟坏块。
pub struct RamDisk {
    /// 每个设备的块数上限
    nblocks: u32,
    /// 已写入的块
    blocks: Mutex<BTreeMap<BlockId, Box<[u8; BSIZE]>>>,
    /// 注入故障的块
    faulty: Mutex<Option<BlockId>>,
    /// 物理读取次数
    reads: AtomicU64,
    /// 物理写入次数
    writes: AtomicU64,
    /// 刷新次数
    flushes: AtomicU64,
}

impl RamDisk {
    /// 创建内存块设备
    ///
    /// # 参数
    ///
    /// * `nblocks` - 每个设备的块数，越界访问返回 `InvalidInput`
    pub fn new(nblocks: u32) -> Self {
        Self {
            nblocks,
            blocks: Mutex::new(BTreeMap::new()),
            faulty: Mutex::new(None),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
        }
    }

    /// 让指定块之后的读写都返回 I/O 错误，传入 `None` 取消
    pub fn fail_on(&self, block: Option<BlockId>) {
        *self.faulty.lock() = block;
    }

    /// 直接修改设备上的块内容（绕过缓存，不计入 I/O 次数）
    pub fn poke(&self, block: BlockId, data: &[u8; BSIZE]) {
        self.blocks.lock().insert(block, Box::new(*data));
    }

    /// 直接读取设备上的块内容（绕过缓存，不计入 I/O 次数）
    pub fn peek(&self, block: BlockId) -> [u8; BSIZE] {
        self.blocks
            .lock()
            .get(&block)
            .map(|data| **data)
            .unwrap_or([0u8; BSIZE])
    }

    /// 物理读取次数
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// 物理写入次数
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// 刷新次数
    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    fn check(&self, block: BlockId) -> Result<()> {
        if block.blockno >= self.nblocks {
            return Err(Error::new(ErrorKind::InvalidInput, "Block number out of range"));
        }
        if *self.faulty.lock() == Some(block) {
            log::warn!("[RAMDISK] injected I/O failure on block {}", block);
            return Err(Error::new(ErrorKind::Io, "Injected I/O failure"));
        }
        Ok(())
    }
}

impl BlockDevice for RamDisk {
    fn read_block(&self, block: BlockId, buf: &mut [u8; BSIZE]) -> Result<()> {
        self.check(block)?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        match self.blocks.lock().get(&block) {
            Some(data) => buf.copy_from_slice(&data[..]),
            None => buf.fill(0),
        }
        Ok(())
    }

    fn write_block(&self, block: BlockId, buf: &[u8; BSIZE]) -> Result<()> {
        self.check(block)?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.blocks.lock().insert(block, Box::new(*buf));
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl core::fmt::Debug for RamDisk {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RamDisk")
            .field("nblocks", &self.nblocks)
            .field("resident", &self.blocks.lock().len())
            .field("reads", &self.reads())
            .field("writes", &self.writes())
            .field("flushes", &self.flushes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwritten_block_reads_zero() {
        let disk = RamDisk::new(16);
        let mut buf = [0xAAu8; BSIZE];
        disk.read_block(BlockId::new(0, 3), &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
        assert_eq!(disk.reads(), 1);
    }

    #[test]
    fn test_write_then_read() {
        let disk = RamDisk::new(16);
        let mut data = [0u8; BSIZE];
        data[0] = 0x42;
        data[BSIZE - 1] = 0x24;
        disk.write_block(BlockId::new(1, 7), &data).unwrap();

        let mut buf = [0u8; BSIZE];
        disk.read_block(BlockId::new(1, 7), &mut buf).unwrap();
        assert_eq!(buf, data);

        // 其他设备上的同号块不受影响
        disk.read_block(BlockId::new(0, 7), &mut buf).unwrap();
        assert_eq!(buf[0], 0);
        assert_eq!(disk.writes(), 1);
        assert_eq!(disk.reads(), 2);
    }

    #[test]
    fn test_flush_counted() {
        let disk = RamDisk::new(4);
        assert_eq!(disk.flushes(), 0);
        disk.flush().unwrap();
        (&disk).flush().unwrap();
        assert_eq!(disk.flushes(), 2);
        assert_eq!(disk.writes(), 0);
    }

    #[test]
    fn test_out_of_range() {
        let disk = RamDisk::new(4);
        let mut buf = [0u8; BSIZE];
        let err = disk.read_block(BlockId::new(0, 4), &mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_fault_injection() {
        let disk = RamDisk::new(4);
        let bad = BlockId::new(0, 2);
        disk.fail_on(Some(bad));

        let mut buf = [0u8; BSIZE];
        assert_eq!(disk.read_block(bad, &mut buf).unwrap_err().kind(), ErrorKind::Io);
        assert!(disk.read_block(BlockId::new(0, 1), &mut buf).is_ok());

        disk.fail_on(None);
        assert!(disk.read_block(bad, &mut buf).is_ok());
    }
}
