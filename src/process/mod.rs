//! 调度器接口
//!
//! 缓冲区缓存本身不管理进程，只需要"线程可以阻塞并被唤醒"这一能力，
//! 以及关中断、识别当前 CPU / 线程和读取时钟滴答。
//! 这些能力由内核通过 [`Scheduler`] 提供，并作为类型参数注入到锁与缓存中。

use crate::spinlock::SpinLockGuard;

#[cfg(test)]
pub mod host;

/// 内核调度器向锁与缓冲区缓存提供的原语。
///
/// 所有方法均为关联函数：与 `CpuManager::cpu_id()`、`push_off()` 等一样，
/// 它们作用于"当前 CPU / 当前线程"，不需要实例。
pub trait Scheduler: Sized + 'static {
    /// 当前 CPU（hart）的编号。
    ///
    /// 仅在关中断（`push_off`）期间调用才有意义，
    /// 否则线程可能在读取后被迁移到另一个 CPU。
    fn cpu_id() -> usize;

    /// 关闭中断，可嵌套；与 `pop_off` 成对使用。
    fn push_off();

    /// 撤销一次 `push_off`，嵌套计数归零时恢复之前的中断状态。
    ///
    /// # 可能的错误
    /// 调用次数多于 `push_off` 时 panic。
    fn pop_off();

    /// 当前线程（进程）的标识，非零。
    fn pid() -> usize;

    /// 在 `channel` 上休眠。
    ///
    /// # 功能说明
    /// 原子地释放 `guard` 并阻塞当前线程，直到有人对同一 `channel` 调用 `wakeup`。
    /// 返回时不持有任何锁，调用者需要重新获取锁并再次检查等待条件（可能虚假唤醒）。
    fn sleep<T>(channel: usize, guard: SpinLockGuard<'_, T, Self>);

    /// 唤醒所有在 `channel` 上休眠的线程。
    fn wakeup(channel: usize);

    /// 全局单调递增的时钟滴答计数。
    fn ticks() -> u32;
}
