//! 块设备抽象
//!
//! 提供块设备接口和一个纯内存的块设备实现。
//! block/device.rs 定义缓存依赖的同步读写接口
//! block/ramdisk.rs 提供基于内存的设备，可注入 I/O 故障

mod device;
mod ramdisk;

pub use device::BlockDevice;
pub use ramdisk::RamDisk;
