//! 设备驱动模块，目前只有块设备

use crate::fs::BufData;

pub mod ramdisk;

pub use ramdisk::RamDisk;

/// 块设备：以块为单位同步读写。
///
/// 缓冲区缓存只依赖这两个原语；调用返回时数据已经在内存或磁盘上就位。
/// 本层不处理 I/O 错误，设备故障由驱动自身 panic。
pub trait BlockDevice: Send + Sync {
    /// 将设备 `dev` 的第 `blockno` 块读入 `data`。
    fn read_block(&self, dev: u32, blockno: u32, data: &mut BufData);

    /// 将 `data` 写到设备 `dev` 的第 `blockno` 块。
    fn write_block(&self, dev: u32, blockno: u32, data: &BufData);
}
