//! 内存盘：用一段内存模拟单个块设备
//!
//! 适合在没有 virtio 磁盘时挂载小型文件系统镜像，也用于观察缓存产生的设备流量。

use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use super::BlockDevice;
use crate::consts::fs::BSIZE;
use crate::fs::BufData;
use crate::process::Scheduler;
use crate::spinlock::SpinLock;

pub struct RamDisk<S: Scheduler> {
    /// 本设备的设备号
    dev: u32,
    blocks: SpinLock<Vec<BufData>, S>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl<S: Scheduler> RamDisk<S> {
    /// 创建一个全零、共 `nblocks` 块的内存盘。
    pub fn new(dev: u32, nblocks: usize) -> Self {
        let blocks = (0..nblocks).map(|_| BufData::new()).collect();
        Self::with_blocks(dev, blocks)
    }

    /// 用磁盘镜像初始化内存盘。
    ///
    /// 镜像长度不是 `BSIZE` 的整数倍时，最后一块的剩余部分补零。
    pub fn from_image(dev: u32, image: &[u8]) -> Self {
        let blocks = image
            .chunks(BSIZE)
            .map(|chunk| {
                let mut block = BufData::new();
                block.as_mut_slice()[..chunk.len()].copy_from_slice(chunk);
                block
            })
            .collect();
        Self::with_blocks(dev, blocks)
    }

    fn with_blocks(dev: u32, blocks: Vec<BufData>) -> Self {
        Self {
            dev,
            blocks: SpinLock::new(blocks, "ramdisk"),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn dev(&self) -> u32 {
        self.dev
    }

    /// 设备总块数
    pub fn nblocks(&self) -> usize {
        self.blocks.lock().len()
    }

    /// 累计的块读取次数
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// 累计的块写入次数
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    /// 绕过缓存直接查看某一块在"盘上"的内容
    pub fn snapshot(&self, blockno: u32) -> BufData {
        let blocks = self.blocks.lock();
        match blocks.get(blockno as usize) {
            Some(block) => block.clone(),
            None => panic!("ramdisk: blockno {} out of range", blockno),
        }
    }

    fn check(&self, dev: u32, blockno: u32, nblocks: usize) {
        if dev != self.dev {
            panic!("ramdisk: wrong dev {}", dev);
        }
        if blockno as usize >= nblocks {
            panic!("ramdisk: blockno {} out of range", blockno);
        }
    }
}

impl<S: Scheduler> BlockDevice for RamDisk<S> {
    fn read_block(&self, dev: u32, blockno: u32, data: &mut BufData) {
        let blocks = self.blocks.lock();
        self.check(dev, blockno, blocks.len());
        data.as_mut_slice()
            .copy_from_slice(blocks[blockno as usize].as_slice());
        drop(blocks);
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    fn write_block(&self, dev: u32, blockno: u32, data: &BufData) {
        let mut blocks = self.blocks.lock();
        self.check(dev, blockno, blocks.len());
        blocks[blockno as usize]
            .as_mut_slice()
            .copy_from_slice(data.as_slice());
        drop(blocks);
        self.writes.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::host::HostScheduler;

    type Disk = RamDisk<HostScheduler>;

    #[test]
    fn image_is_split_into_blocks() {
        let mut image = vec![0u8; BSIZE + 10];
        image[0] = 0xaa;
        image[BSIZE] = 0xbb;
        image[BSIZE + 9] = 0xcc;
        let disk = Disk::from_image(1, &image);
        assert_eq!(disk.nblocks(), 2);

        let mut data = BufData::new();
        disk.read_block(1, 1, &mut data);
        assert_eq!(data.as_slice()[0], 0xbb);
        assert_eq!(data.as_slice()[9], 0xcc);
        assert!(data.as_slice()[10..].iter().all(|&b| b == 0));
        assert_eq!(disk.snapshot(0).as_slice()[0], 0xaa);
        assert_eq!(disk.reads(), 1);
    }

    #[test]
    fn writes_land_on_disk() {
        let disk = Disk::new(1, 4);
        let mut data = BufData::new();
        data.as_mut_slice().fill(0x5a);
        disk.write_block(1, 3, &data);
        assert_eq!(disk.writes(), 1);
        assert_eq!(disk.reads(), 0);
        assert!(disk.snapshot(3).as_slice().iter().all(|&b| b == 0x5a));
    }

    #[test]
    #[should_panic(expected = "ramdisk: blockno 4 out of range")]
    fn out_of_range_is_fatal() {
        let disk = Disk::new(1, 4);
        let mut data = BufData::new();
        disk.read_block(1, 4, &mut data);
    }

    #[test]
    #[should_panic(expected = "ramdisk: wrong dev 2")]
    fn wrong_device_is_fatal() {
        let disk = Disk::new(1, 4);
        disk.write_block(2, 0, &BufData::new());
    }
}
