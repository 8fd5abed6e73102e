//! 睡眠锁模块
//! 提供基于进程休眠/唤醒机制的同步原语，适用于可能长时间持有的锁。
//!
//! 当锁被占用时，尝试获取锁的进程会进入休眠状态，避免忙等待。

use core::cell::{Cell, UnsafeCell};
use core::ops::{Deref, DerefMut, Drop};

use crate::process::Scheduler;
use crate::spinlock::SpinLock;

/// 睡眠锁结构，提供阻塞式同步机制
///
/// 与自旋锁不同，当锁被占用时，尝试获取的进程会进入休眠状态，
/// 直到锁被释放后被唤醒。这避免了忙等待，适用于可能长时间持有的锁，
/// 例如跨越一次磁盘 I/O 的缓冲区访问。
///
/// # 字段说明
/// - `lock`: 内部自旋锁，保护`locked`与`pid`
/// - `locked`: 表示锁是否已被占用
/// - `pid`: 持有者的进程标识，未被持有时为 0
/// - `name`: 锁的标识名称，用于调试
/// - `data`: 被保护的数据，通过`UnsafeCell`实现内部可变性
pub struct SleepLock<T, S: Scheduler> {
    lock: SpinLock<(), S>,
    locked: Cell<bool>,
    pid: Cell<usize>,
    name: &'static str,
    data: UnsafeCell<T>,
}

// 为SleepLock实现Sync，允许跨线程共享（要求T是Send）
// `locked` 与 `pid` 只在持有内部自旋锁时访问
unsafe impl<T: Send, S: Scheduler> Sync for SleepLock<T, S> {}

impl<T, S: Scheduler> SleepLock<T, S> {
    /// 创建一个新的睡眠锁实例
    pub const fn new(data: T, name: &'static str) -> Self {
        Self {
            lock: SpinLock::new((), "sleeplock"),
            locked: Cell::new(false),
            pid: Cell::new(0),
            name,
            data: UnsafeCell::new(data),
        }
    }

    /// 获取睡眠锁（可能阻塞进程）
    ///
    /// # 功能说明
    /// 尝试获取睡眠锁。如果锁已被占用，当前进程将进入休眠状态，
    /// 直到锁被释放后被唤醒。返回守卫对象提供对数据的访问。
    ///
    /// # 流程解释
    /// 1. 获取内部自旋锁保护临界区
    /// 2. 检查`locked`状态：
    ///   - 如果已锁定：调用`sleep()`让当前进程休眠（休眠时内部自旋锁被释放）
    ///   - 如果未锁定：设置`locked=true`并记录持有者
    /// 3. 释放内部自旋锁
    ///
    /// 调用者不得持有任何自旋锁。
    pub fn lock(&self) -> SleepLockGuard<'_, T, S> {
        let mut guard = self.lock.lock();

        while self.locked.get() {
            S::sleep(self.channel(), guard);
            // 被唤醒后重新获取内部锁
            guard = self.lock.lock();
        }

        self.locked.set(true);
        self.pid.set(S::pid());
        drop(guard);

        SleepLockGuard {
            lock: self,
            data: unsafe { &mut *self.data.get() },
        }
    }

    /// 当前进程是否持有该睡眠锁
    pub fn holding(&self) -> bool {
        let guard = self.lock.lock();
        let r = self.locked.get() && self.pid.get() == S::pid();
        drop(guard);
        r
    }

    /// 锁的名称。
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 释放锁（内部方法，由守卫的Drop调用）
    ///
    /// 设置`locked=false`后唤醒所有在该锁上休眠的进程
    fn unlock(&self) {
        let guard = self.lock.lock();
        self.locked.set(false);
        self.pid.set(0);
        S::wakeup(self.channel());
        drop(guard);
    }

    /// 休眠/唤醒所用的通道：`locked` 字段的地址
    fn channel(&self) -> usize {
        self.locked.as_ptr() as usize
    }
}

/// 睡眠锁守卫，提供对受保护数据的访问
///
/// 当守卫存在时，表示锁已被持有。
/// 守卫离开作用域时自动释放锁。
pub struct SleepLockGuard<'a, T, S: Scheduler> {
    lock: &'a SleepLock<T, S>,
    data: &'a mut T,
}

impl<'a, T, S: Scheduler> SleepLockGuard<'a, T, S> {
    /// 当前进程是否仍持有此守卫对应的锁
    pub fn holding(&self) -> bool {
        self.lock.holding()
    }
}

impl<'a, T, S: Scheduler> Deref for SleepLockGuard<'a, T, S> {
    type Target = T;

    fn deref(&self) -> &T {
        &*self.data
    }
}

impl<'a, T, S: Scheduler> DerefMut for SleepLockGuard<'a, T, S> {
    fn deref_mut(&mut self) -> &mut T {
        &mut *self.data
    }
}

impl<'a, T, S: Scheduler> Drop for SleepLockGuard<'a, T, S> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
