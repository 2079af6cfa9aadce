//! 错误类型定义
//!
//! 提供块缓存操作的错误类型。
//!
//! 只有设备 I/O 失败会以 `Err` 的形式返回给调用者；缓冲池耗尽、
//! 引用计数下溢等内部不变量被破坏的情况直接 panic。

use core::fmt;

/// 块缓存操作错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: &'static str,
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// I/O 错误
    Io,
    /// 无效参数
    InvalidInput,
}

impl Error {
    /// 创建新错误
    pub const fn new(kind: ErrorKind, message: &'static str) -> Self {
        Self { kind, message }
    }

    /// 获取错误类型
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// 获取错误消息
    pub const fn message(&self) -> &'static str {
        self.message
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result 类型别名
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_error_accessors() {
        let err = Error::new(ErrorKind::Io, "disk read failed");
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.message(), "disk read failed");
        assert_eq!(err.to_string(), "Io: disk read failed");
    }
}
