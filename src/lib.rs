//! xv6 分桶缓冲区缓存（bcache）
//!
//! 为文件系统、日志与目录层提供对定长磁盘块的统一访问入口：
//! 固定大小的缓冲区池按块号散列到若干桶中，每个桶一把自旋锁，
//! 每个缓冲区一把睡眠锁。

#![cfg_attr(not(test), no_std)]
#![allow(dead_code)]
#![warn(rust_2018_idioms)]

#[macro_use]
extern crate log;

extern crate alloc;

pub mod consts;
pub mod driver;
pub mod fs;
pub mod process;
pub mod sleeplock;
pub mod spinlock;

pub use driver::{BlockDevice, RamDisk};
pub use fs::{can_lock, Bcache, Buf, BufData};
pub use process::Scheduler;
