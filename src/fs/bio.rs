//! 缓存层
//!
//! 缓冲区缓存持有磁盘块内容的内存副本。缓存磁盘块既减少了磁盘读取，
//! 也为多个进程共同使用的磁盘块提供了同步点。
//!
//! 接口：
//! * 要获取某个磁盘块的缓冲区，调用 `bread`；
//! * 修改缓冲区数据后，调用 `bwrite` 写回磁盘；
//! * 用完后丢弃 [`Buf`]（或调用 `brelse`）释放；
//! * 同一时刻只有一个进程能使用某个缓冲区，不要长时间持有。
//!
//! 缓冲区按 `blockno % B` 散列到 `B` 个桶中，每个桶一把自旋锁，
//! 查找与回收不再经过一把全局锁。

use alloc::sync::Arc;

use array_macro::array;

use core::mem;
use core::ptr;
use core::sync::atomic::{AtomicBool, Ordering};

use super::bucket::{can_lock, BufCtrl, BufList};
use crate::consts::fs::{BSIZE, NBUCKET, NBUF};
use crate::driver::BlockDevice;
use crate::process::Scheduler;
use crate::sleeplock::{SleepLock, SleepLockGuard};
use crate::spinlock::{SpinLock, SpinLockGuard};

/// 分桶的缓冲区缓存（Buffer Cache）。
///
/// `Bcache` 提供了一个固定大小的内存缓冲区池，用于缓存磁盘块数据，
/// 以减少重复的磁盘访问。缓冲池被划分到 `B` 个桶中，每个桶由一把自旋锁保护，
/// 负责桶内缓冲区的成员关系以及它们的设备号、块号、引用计数和释放时间；
/// 缓冲区数据则由每个缓冲区自己的睡眠锁保护。
///
/// 整个内核只构造一个实例，启动时创建并贯穿系统运行期间，
/// 以共享引用的方式交给文件系统、日志等上层使用。
///
/// # 类型参数
/// - `S`: 调度器，提供关中断、休眠/唤醒与时钟；
/// - `N`: 缓冲区个数，默认 `NBUF`；
/// - `B`: 桶的个数，默认 `NBUCKET`。
pub struct Bcache<S: Scheduler, const N: usize = NBUF, const B: usize = NBUCKET> {
    /// 底层块设备
    disk: Arc<dyn BlockDevice>,

    /// 每个桶一把自旋锁，锁内是桶中缓冲区的元数据列表
    buckets: [SpinLock<BufList, S>; B],

    /// 缓冲块数组，下标即 `BufCtrl::index`
    bufs: [BufInner<S>; N],
}

/// 回收扫描中当前最好的候选
#[derive(Clone, Copy)]
struct Victim {
    /// 候选所在的桶
    bucket: usize,
    /// 候选在桶列表中的位置
    pos: usize,
    /// 候选的释放时间
    time: u32,
}

impl<S: Scheduler, const N: usize, const B: usize> Bcache<S, N, B> {
    /// 创建缓冲区缓存。
    ///
    /// # 功能说明
    /// 所有缓冲区初始都放在 0 号桶中，均未装载任何块（数据无效、引用计数为 0）；
    /// 其余桶为空。每个桶预留能容纳全部缓冲区的空间，之后迁移缓冲区不会再分配内存。
    ///
    /// # 可能的错误
    /// `N` 或 `B` 为 0 时 panic。
    pub fn new(disk: Arc<dyn BlockDevice>) -> Self {
        if N == 0 || B == 0 {
            panic!("binit: empty buffer cache");
        }

        let buckets = array![i => SpinLock::new(
            if i == 0 { BufList::pristine(N) } else { BufList::empty(N) },
            "bcache.bucket",
        ); B];

        #[cfg(feature = "verbose_init_info")]
        info!(
            "bcache: {} buffers of {} bytes in {} buckets",
            N, BSIZE, B
        );

        Self {
            disk,
            buckets,
            bufs: array![_ => BufInner::new(); N],
        }
    }

    /// 块号所属的桶
    fn bucket_of(blockno: u32) -> usize {
        blockno as usize % B
    }

    /// 在缓冲区缓存中查找设备 `dev` 上的块 `blockno`，若未缓存则回收一个缓冲区。
    /// 两种情况下都返回已加锁的缓冲区，其数据不保证有效。
    ///
    /// # 流程解释
    /// 1. 获取 `blockno % B` 号桶（本桶）的锁，在其中查找该块；
    ///    命中则增加引用计数，先释放桶锁再等待缓冲区的睡眠锁。
    /// 2. 未命中时在本桶和 `can_lock` 允许的其他桶中寻找释放时间最早的空闲缓冲区。
    ///    逐个加锁扫描，只有当前最佳候选所在的桶保持加锁，
    ///    找到更好的候选时释放之前的候选桶。
    ///    `can_lock` 不允许的桶对本次回收不可见，即使其中有全局最旧的缓冲区，
    ///    所以这里只是近似 LRU。
    /// 3. 把候选从原桶摘下，改写为新的 (dev, blockno)，引用计数置 1、数据置为无效，
    ///    追加到本桶尾部；随后释放两把桶锁，最后获取睡眠锁。
    ///
    /// # 可能的错误
    /// 所有可见的缓冲区都在使用中时 panic（"bget: no buffers"），缓冲池不会增长，
    /// 也不会等待其他进程释放。
    pub fn bget(&self, dev: u32, blockno: u32) -> Buf<'_, S, N, B> {
        let bucket_id = Self::bucket_of(blockno);
        let mut home = self.buckets[bucket_id].lock();

        // 块是否已经缓存？
        if let Some(ctrl) = home.find_cached(dev, blockno) {
            ctrl.refcnt += 1;
            let index = ctrl.index;
            drop(home);
            trace!("bget: dev {} blockno {} hit buf {}", dev, blockno, index);
            return self.locked(index, dev, blockno);
        }

        // 未缓存
        // 回收最近最少使用（LRU）的未使用缓冲区
        let mut victim = home.lru_free().map(|(pos, time)| Victim {
            bucket: bucket_id,
            pos,
            time,
        });
        let mut victim_bucket: Option<SpinLockGuard<'_, BufList, S>> = None;
        for j in 0..B {
            if !can_lock(bucket_id, j, B) {
                continue;
            }
            let guard = self.buckets[j].lock();
            match guard.lru_free() {
                Some((pos, time)) if victim.map_or(true, |v| time < v.time) => {
                    victim = Some(Victim {
                        bucket: j,
                        pos,
                        time,
                    });
                    // 之前的候选桶随旧守卫一起释放
                    victim_bucket = Some(guard);
                }
                _ => drop(guard),
            }
        }

        let victim = match victim {
            Some(v) => v,
            None => panic!("bget: no buffers"),
        };

        // 候选桶与本桶可能是同一个，此时只持有本桶的锁
        let mut ctrl: BufCtrl = match victim_bucket.as_mut() {
            Some(guard) => guard.take(victim.pos),
            None => home.take(victim.pos),
        };
        ctrl.dev = dev;
        ctrl.blockno = blockno;
        ctrl.refcnt = 1;
        let index = ctrl.index;
        self.bufs[index].valid.store(false, Ordering::Relaxed);
        home.append(ctrl);

        drop(victim_bucket);
        drop(home);
        debug!(
            "bget: recycle buf {} from bucket {} for dev {} blockno {}",
            index, victim.bucket, dev, blockno
        );
        self.locked(index, dev, blockno)
    }

    /// 获取缓冲区的睡眠锁并包装为 [`Buf`]。
    ///
    /// 调用时不得持有任何桶锁：等待睡眠锁可能休眠。
    fn locked(&self, index: usize, dev: u32, blockno: u32) -> Buf<'_, S, N, B> {
        Buf {
            index,
            dev,
            blockno,
            cache: self,
            data: Some(self.bufs[index].data.lock()),
        }
    }

    /// 返回一个包含指定块内容的已加锁缓冲区。
    ///
    /// 缓冲区数据无效时同步地从磁盘读取，读取期间持有睡眠锁但不持有任何桶锁。
    pub fn bread(&self, dev: u32, blockno: u32) -> Buf<'_, S, N, B> {
        let mut b = self.bget(dev, blockno);
        if !self.bufs[b.index].valid.load(Ordering::Relaxed) {
            self.disk.read_block(dev, blockno, b.data_mut());
            self.bufs[b.index].valid.store(true, Ordering::Relaxed);
        }
        b
    }

    /// 释放一个已加锁的缓冲区，等价于丢弃 `b`。
    ///
    /// # 可能的错误
    /// `b` 不属于本缓存时 panic（"brelse"）；当前进程并未持有它时，
    /// 丢弃 `b` 本身就会 panic（"brelse"）。
    pub fn brelse(&self, b: Buf<'_, S, N, B>) {
        if !ptr::eq(b.cache, self) {
            panic!("brelse");
        }
        drop(b);
    }

    /// 释放的后半部分：睡眠锁已经放开，在桶锁下减少引用计数。
    ///
    /// 引用计数降为 0 时记录当前时钟滴答作为 LRU 依据。
    /// 缓冲区被引用期间不会迁移，所以它一定在 `blockno` 对应的桶中。
    fn release(&self, index: usize, blockno: u32) {
        let mut bucket = self.buckets[Self::bucket_of(blockno)].lock();
        let ctrl = match bucket.get_mut(index) {
            Some(ctrl) => ctrl,
            None => panic!("brelse: buf {} not in its bucket", index),
        };
        ctrl.refcnt -= 1;
        if ctrl.refcnt == 0 {
            ctrl.time = S::ticks();
        }
    }

    /// 增加缓冲区的引用计数，使其在释放后也不会被回收。只需要桶锁。
    pub fn bpin(&self, b: &Buf<'_, S, N, B>) {
        let mut bucket = self.buckets[Self::bucket_of(b.blockno)].lock();
        match bucket.get_mut(b.index) {
            Some(ctrl) => ctrl.refcnt += 1,
            None => panic!("bpin: buf {} not in its bucket", b.index),
        }
    }

    /// 撤销一次 `bpin`。
    ///
    /// # 可能的错误
    /// 调用者自身持有 `b` 占了一个引用，引用计数不大于 1 说明没有与之匹配的 `bpin`，
    /// panic（"buf unpin not match"）。
    pub fn bunpin(&self, b: &Buf<'_, S, N, B>) {
        let mut bucket = self.buckets[Self::bucket_of(b.blockno)].lock();
        let ctrl = match bucket.get_mut(b.index) {
            Some(ctrl) => ctrl,
            None => panic!("bunpin: buf {} not in its bucket", b.index),
        };
        if ctrl.refcnt <= 1 {
            panic!("buf unpin not match");
        }
        ctrl.refcnt -= 1;
    }

    /// 若 (dev, blockno) 在缓存中，返回其引用计数
    pub fn refcnt(&self, dev: u32, blockno: u32) -> Option<usize> {
        let mut bucket = self.buckets[Self::bucket_of(blockno)].lock();
        bucket.find_cached(dev, blockno).map(|ctrl| ctrl.refcnt)
    }

    /// 各个桶当前的缓冲区个数
    pub fn occupancy(&self) -> [usize; B] {
        array![j => self.buckets[j].lock().len(); B]
    }
}

/// 已加锁的缓冲区。
///
/// 持有 `Buf` 即持有该缓冲区的睡眠锁，可以自由读写其数据；
/// 丢弃时先释放睡眠锁，再在桶锁下减少引用计数。
pub struct Buf<'a, S: Scheduler, const N: usize = NBUF, const B: usize = NBUCKET> {
    /// 缓冲池中的下标
    index: usize,

    /// 设备号
    dev: u32,

    /// 块号
    blockno: u32,

    /// 所属的缓存
    cache: &'a Bcache<S, N, B>,

    /// 数据的睡眠锁守卫，只在 `drop` 中被取走
    data: Option<SleepLockGuard<'a, BufData, S>>,
}

impl<'a, S: Scheduler, const N: usize, const B: usize> Buf<'a, S, N, B> {
    pub fn dev(&self) -> u32 {
        self.dev
    }

    pub fn blockno(&self) -> u32 {
        self.blockno
    }

    pub fn data(&self) -> &BufData {
        match self.data.as_ref() {
            Some(guard) => &**guard,
            None => panic!("buf {} released", self.index),
        }
    }

    pub fn data_mut(&mut self) -> &mut BufData {
        match self.data.as_mut() {
            Some(guard) => &mut **guard,
            None => panic!("buf {} released", self.index),
        }
    }

    /// 当前进程是否持有该缓冲区的睡眠锁
    pub fn holding(&self) -> bool {
        self.data.as_ref().map_or(false, |guard| guard.holding())
    }

    /// 把缓冲区内容同步写回磁盘。
    ///
    /// 不检查数据是否被修改过，每次调用都会写盘。
    /// 当前进程必须持有睡眠锁，否则 panic（"bwrite"）。
    pub fn bwrite(&mut self) {
        if !self.holding() {
            panic!("bwrite");
        }
        self.cache.disk.write_block(self.dev, self.blockno, self.data());
    }

    /// 钉住缓冲区，见 [`Bcache::bpin`]
    pub fn pin(&self) {
        self.cache.bpin(self);
    }

    /// 解除钉住，见 [`Bcache::bunpin`]
    pub fn unpin(&self) {
        self.cache.bunpin(self);
    }
}

impl<'a, S: Scheduler, const N: usize, const B: usize> Drop for Buf<'a, S, N, B> {
    fn drop(&mut self) {
        let guard = self.data.take();
        if !guard.as_ref().map_or(false, |g| g.holding()) {
            // 睡眠锁属于别的进程，不能替它放开
            mem::forget(guard);
            panic!("brelse");
        }
        // 先放开睡眠锁，正在回收的 bget 不必在桶锁后面等待
        drop(guard);
        self.cache.release(self.index, self.blockno);
    }
}

struct BufInner<S: Scheduler> {
    /// 数据是否已从磁盘读入
    valid: AtomicBool,

    data: SleepLock<BufData, S>,
}

impl<S: Scheduler> BufInner<S> {
    const fn new() -> Self {
        Self {
            valid: AtomicBool::new(false),
            data: SleepLock::new(BufData::new(), "buffer"),
        }
    }
}

/// 一个块的数据
#[repr(C, align(8))]
#[derive(Clone)]
pub struct BufData([u8; BSIZE]);

impl BufData {
    pub const fn new() -> Self {
        Self([0; BSIZE])
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl Default for BufData {
    fn default() -> Self {
        Self::new()
    }
}
