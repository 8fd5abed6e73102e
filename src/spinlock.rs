//! 自旋锁模块
//! 自旋锁将数据包裹在自身内部以保护这些数据。

use core::cell::UnsafeCell;
use core::hint;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut, Drop};
use core::sync::atomic::{fence, AtomicBool, AtomicIsize, Ordering};

use crate::process::Scheduler;

/// 表示一个自旋锁结构，用于在多核环境下保护共享数据。
///
/// `SpinLock` 提供了互斥访问内部数据的能力，通过忙等待（busy-waiting）实现锁机制。
/// 当锁被占用时，尝试获取锁的CPU将在循环中等待，直到锁被释放。
/// 该锁还跟踪持有锁的CPU ID，用于调试和死锁检测。
///
/// # 类型参数
/// - `T`: 被保护的数据类型；
/// - `S`: 提供关中断与 CPU 编号的调度器。
///
/// # 字段说明
/// - `lock`: 原子布尔值，表示锁的状态（`false`=未锁定，`true`=已锁定）；
/// - `name`: 锁的名称，用于调试和标识；
/// - `cpuid`: 当前持有锁的CPU ID（-1表示无CPU持有）；
/// - `data`: 被保护的数据，通过`UnsafeCell`实现内部可变性。
pub struct SpinLock<T, S: Scheduler> {
    lock: AtomicBool,
    name: &'static str,
    cpuid: AtomicIsize,
    data: UnsafeCell<T>,
    _sched: PhantomData<fn() -> S>,
}

// 为SpinLock实现Sync trait，允许跨线程共享（要求T是Send）
unsafe impl<T: Send, S: Scheduler> Sync for SpinLock<T, S> {}

impl<T, S: Scheduler> SpinLock<T, S> {
    /// 创建一个新的自旋锁实例。
    ///
    /// # 参数
    /// - `data`: 需要被保护的数据；
    /// - `name`: 锁的标识名称，用于调试。
    pub const fn new(data: T, name: &'static str) -> Self {
        Self {
            lock: AtomicBool::new(false),
            name,
            cpuid: AtomicIsize::new(-1),
            data: UnsafeCell::new(data),
            _sched: PhantomData,
        }
    }

    /// 获取自旋锁并返回一个守卫对象。
    ///
    /// # 功能说明
    /// 通过忙等待获取锁的所有权，返回一个守卫对象。
    /// 守卫对象实现了`Deref`和`DerefMut`，允许直接访问被保护数据。
    /// 当守卫对象离开作用域时，自动释放锁。
    ///
    /// 守卫存在期间中断处于关闭状态，因此持有守卫时不得休眠。
    ///
    /// # 示例
    /// ```ignore
    /// let lock = SpinLock::<_, Sched>::new(0, "test");
    /// {
    ///     let mut guard = lock.lock(); // 获取锁
    ///     *guard = 42; // 修改受保护数据
    /// } // 守卫离开作用域，自动释放锁
    /// ```
    pub fn lock(&self) -> SpinLockGuard<'_, T, S> {
        self.acquire();
        SpinLockGuard {
            lock: self,
            data: unsafe { &mut *self.data.get() },
        }
    }

    /// 检查当前CPU是否持有此锁。
    ///
    /// 必须在关中断的上下文中调用才有意义。
    pub fn holding(&self) -> bool {
        self.lock.load(Ordering::Relaxed)
            && self.cpuid.load(Ordering::Relaxed) == S::cpu_id() as isize
    }

    /// 锁的名称。
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 获取锁的核心实现。
    ///
    /// # 流程解释
    /// 1. 调用`push_off()`禁用中断；
    /// 2. 检查是否已持有锁（防止重入造成死锁）；
    /// 3. 使用原子比较交换（CAS）忙等待获取锁；
    /// 4. 获取成功后设置内存屏障；
    /// 5. 记录当前CPU ID。
    fn acquire(&self) {
        S::push_off();
        if self.holding() {
            panic!("spinlock {} acquire", self.name);
        }
        while self
            .lock
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            hint::spin_loop();
        }
        fence(Ordering::SeqCst);
        self.cpuid.store(S::cpu_id() as isize, Ordering::Relaxed);
    }

    /// 释放锁的核心实现，由守卫的`Drop`调用。
    fn release(&self) {
        if !self.holding() {
            panic!("spinlock {} release", self.name);
        }
        self.cpuid.store(-1, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        self.lock.store(false, Ordering::Release);
        S::pop_off();
    }
}

/// 自旋锁守卫对象，提供对受保护数据的访问。
///
/// 当守卫对象存在时，表示锁已被持有。
/// 守卫离开作用域时自动释放锁。
pub struct SpinLockGuard<'a, T, S: Scheduler> {
    lock: &'a SpinLock<T, S>,
    data: &'a mut T,
}

impl<'a, T, S: Scheduler> Deref for SpinLockGuard<'a, T, S> {
    type Target = T;

    fn deref(&self) -> &T {
        &*self.data
    }
}

impl<'a, T, S: Scheduler> DerefMut for SpinLockGuard<'a, T, S> {
    fn deref_mut(&mut self) -> &mut T {
        &mut *self.data
    }
}

impl<'a, T, S: Scheduler> Drop for SpinLockGuard<'a, T, S> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

impl<'a, T, S: Scheduler> SpinLockGuard<'a, T, S> {
    /// 检查当前CPU是否持有此守卫对应的锁。
    pub fn holding(&self) -> bool {
        self.lock.holding()
    }
}
