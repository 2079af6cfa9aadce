//! 块标识
//!
//! 缓存中每个缓冲块都以 `(设备号, 块号)` 标识。

use core::fmt;

/// 块标识：设备号 + 块号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BlockId {
    /// 设备号
    pub dev: u32,
    /// 块号
    pub blockno: u32,
}

impl BlockId {
    /// 创建块标识
    pub const fn new(dev: u32, blockno: u32) -> Self {
        Self { dev, blockno }
    }

    /// 计算块所属的哈希桶
    ///
    /// 只取决于块号，与设备号无关。
    #[inline]
    pub const fn bucket(&self, nbuckets: usize) -> usize {
        self.blockno as usize % nbuckets
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dev, self.blockno)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_hash_ignores_device() {
        assert_eq!(BlockId::new(0, 27).bucket(13), 1);
        assert_eq!(BlockId::new(7, 27).bucket(13), 1);
        assert_eq!(BlockId::new(0, 5).bucket(1), 0);
    }

    #[test]
    fn test_ordering() {
        assert!(BlockId::new(0, 9) < BlockId::new(1, 0));
        assert!(BlockId::new(1, 2) < BlockId::new(1, 3));
    }
}
