//! 块缓存常量定义
//!
//! 缓存的几何参数在编译期固定，运行期不可调整。

/// 块大小（字节）
pub const BSIZE: usize = 1024;

/// 单个文件系统操作最多写入的块数
pub const MAXOPBLOCKS: usize = 10;

/// 缓冲池中的缓冲块数量
pub const NBUF: usize = MAXOPBLOCKS * 3;

/// 哈希桶数量（取素数以分散连续块号）
pub const NBUF_BUCKETS: usize = 13;
