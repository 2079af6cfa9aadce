//! 块设备接口

use crate::consts::BSIZE;
use crate::error::Result;
use crate::types::BlockId;
use alloc::sync::Arc;

/// 块设备接口
///
/// 实现此 trait 以向缓存提供底层块设备访问。读写都是同步的，
/// 一次传输一个完整的 `BSIZE` 字节块。
///
/// 方法接收 `&self`：多个线程可能同时对不同的块发起 I/O，
/// 设备需要自行完成内部的串行化（例如用锁保护请求队列）。
///
/// # 示例
///
/// ```rust,ignore
/// use bcache_core::{BlockDevice, BlockId, Result, BSIZE};
///
/// struct VirtioDisk {
///     // ...
/// }
///
/// impl BlockDevice for VirtioDisk {
///     fn read_block(&self, block: BlockId, buf: &mut [u8; BSIZE]) -> Result<()> {
///         // 提交读请求并等待完成
///         Ok(())
///     }
///
///     fn write_block(&self, block: BlockId, buf: &[u8; BSIZE]) -> Result<()> {
///         // 提交写请求并等待完成
///         Ok(())
///     }
/// }
/// ```
pub trait BlockDevice {
    /// 读取一个块
    ///
    /// # 参数
    ///
    /// * `block` - 块标识
    /// * `buf` - 目标缓冲区
    fn read_block(&self, block: BlockId, buf: &mut [u8; BSIZE]) -> Result<()>;

    /// 写入一个块
    ///
    /// # 参数
    ///
    /// * `block` - 块标识
    /// * `buf` - 源缓冲区
    fn write_block(&self, block: BlockId, buf: &[u8; BSIZE]) -> Result<()>;

    /// 刷新设备自身的写缓存
    ///
    /// 缓存每次 `bwrite` 在 `write_block` 之后调用，返回 `Ok` 表示数据已经持久化。
    /// 没有写缓存的设备使用默认实现即可。
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

impl<T: BlockDevice + ?Sized> BlockDevice for &T {
    fn read_block(&self, block: BlockId, buf: &mut [u8; BSIZE]) -> Result<()> {
        (**self).read_block(block, buf)
    }

    fn write_block(&self, block: BlockId, buf: &[u8; BSIZE]) -> Result<()> {
        (**self).write_block(block, buf)
    }

    fn flush(&self) -> Result<()> {
        (**self).flush()
    }
}

impl<T: BlockDevice + ?Sized> BlockDevice for Arc<T> {
    fn read_block(&self, block: BlockId, buf: &mut [u8; BSIZE]) -> Result<()> {
        (**self).read_block(block, buf)
    }

    fn write_block(&self, block: BlockId, buf: &[u8; BSIZE]) -> Result<()> {
        (**self).write_block(block, buf)
    }

    fn flush(&self) -> Result<()> {
        (**self).flush()
    }
}
