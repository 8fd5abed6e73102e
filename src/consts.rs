//! 内核参数

pub mod fs {
    /// 块大小（字节）
    pub const BSIZE: usize = 1024;
    /// 缓冲区池大小
    pub const NBUF: usize = 30;
    /// 缓冲区缓存的桶数
    pub const NBUCKET: usize = 13;
    /// 尚未装载任何块的缓冲区所使用的设备号
    pub const NODEV: u32 = u32::MAX;
}
