//! 宿主机上的调度器实现，仅用于单元测试
//!
//! 每个 std 线程同时扮演一个 CPU 和一个进程；
//! 休眠/唤醒用一个全局的代计数加条件变量实现，任何唤醒都会让所有休眠者重新检查条件。

use std::cell::Cell;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

use super::Scheduler;
use crate::spinlock::SpinLockGuard;

static NEXT_ID: AtomicUsize = AtomicUsize::new(1);
static TICKS: AtomicU32 = AtomicU32::new(0);

static GENERATION: Mutex<u64> = Mutex::new(0);
static WAKE: Condvar = Condvar::new();

thread_local! {
    static ID: usize = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    static NOFF: Cell<usize> = Cell::new(0);
}

pub struct HostScheduler;

impl Scheduler for HostScheduler {
    fn cpu_id() -> usize {
        ID.with(|id| *id)
    }

    fn push_off() {
        NOFF.with(|noff| noff.set(noff.get() + 1));
    }

    fn pop_off() {
        NOFF.with(|noff| match noff.get().checked_sub(1) {
            Some(n) => noff.set(n),
            None => panic!("pop_off(): count not match"),
        });
    }

    fn pid() -> usize {
        ID.with(|id| *id)
    }

    fn sleep<T>(_channel: usize, guard: SpinLockGuard<'_, T, Self>) {
        // 先拿到代计数再放自旋锁，唤醒者必须等我们进入 wait 之后才能推进代计数
        let mut generation = GENERATION.lock().unwrap();
        let seen = *generation;
        drop(guard);
        while *generation == seen {
            generation = WAKE.wait(generation).unwrap();
        }
    }

    fn wakeup(_channel: usize) {
        let mut generation = GENERATION.lock().unwrap();
        *generation = generation.wrapping_add(1);
        WAKE.notify_all();
    }

    fn ticks() -> u32 {
        // 每次读取推进一格，保证同一线程先后两次释放得到严格递增的时间戳
        TICKS.fetch_add(1, Ordering::Relaxed) + 1
    }
}
