//! 文件系统模块
//!
//! 目前只包含块缓冲层；日志、inode 与目录层都建立在 [`Bcache`] 之上。

mod bio;
mod bucket;

pub use bio::{Bcache, Buf, BufData};
pub use bucket::can_lock;
