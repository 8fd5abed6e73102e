//! 缓存桶：每个桶持有一组缓冲区的元数据，由该桶的自旋锁保护

use alloc::vec::Vec;

use crate::consts::fs::NODEV;

/// 单个缓冲区的元数据
///
/// 元数据跟随缓冲区所在的桶移动：缓冲区属于哪个桶，它的 `BufCtrl` 就存放在哪个桶的列表里，
/// 因此同一时刻只能由一把桶锁保护。缓冲区数据本身不在这里，由每个缓冲区的睡眠锁保护。
pub(super) struct BufCtrl {
    /// 设备号
    pub dev: u32,

    /// 块号
    pub blockno: u32,

    /// 引用计数，为 0 时才能被回收
    pub refcnt: usize,

    /// 引用计数最近一次降为 0 时的时钟滴答，越小越久未用
    pub time: u32,

    /// 缓冲区在缓冲池中的下标，永不改变
    pub index: usize,
}

impl BufCtrl {
    const fn new(index: usize) -> Self {
        Self {
            dev: NODEV,
            blockno: 0,
            refcnt: 0,
            time: 0,
            index,
        }
    }
}

/// 一个桶内的缓冲区列表
///
/// 列表中的顺序没有语义，只保证新加入的缓冲区追加在尾部。
pub(super) struct BufList {
    bufs: Vec<BufCtrl>,
}

impl BufList {
    /// 空桶。预留 `nbuf` 个位置，之后的迁入不会再分配内存。
    pub fn empty(nbuf: usize) -> Self {
        Self {
            bufs: Vec::with_capacity(nbuf),
        }
    }

    /// 包含缓冲池中全部 `nbuf` 个未使用缓冲区的桶，启动时只有 0 号桶如此初始化
    pub fn pristine(nbuf: usize) -> Self {
        let mut list = Self::empty(nbuf);
        list.bufs.extend((0..nbuf).map(BufCtrl::new));
        list
    }

    pub fn len(&self) -> usize {
        self.bufs.len()
    }

    /// 查找缓存了 (dev, blockno) 的缓冲区
    pub fn find_cached(&mut self, dev: u32, blockno: u32) -> Option<&mut BufCtrl> {
        self.bufs
            .iter_mut()
            .find(|b| b.dev == dev && b.blockno == blockno)
    }

    /// 按缓冲池下标查找
    pub fn get_mut(&mut self, index: usize) -> Option<&mut BufCtrl> {
        self.bufs.iter_mut().find(|b| b.index == index)
    }

    /// 本桶中最久未用的空闲缓冲区，返回它在列表中的位置和释放时间。
    ///
    /// 释放时间相同时取列表中靠前的一个。
    pub fn lru_free(&self) -> Option<(usize, u32)> {
        let mut found: Option<(usize, u32)> = None;
        for (pos, b) in self.bufs.iter().enumerate() {
            if b.refcnt == 0 && found.map_or(true, |(_, time)| b.time < time) {
                found = Some((pos, b.time));
            }
        }
        found
    }

    /// 从列表中摘下位于 `pos` 的缓冲区
    pub fn take(&mut self, pos: usize) -> BufCtrl {
        self.bufs.remove(pos)
    }

    /// 追加到列表尾部
    pub fn append(&mut self, ctrl: BufCtrl) {
        self.bufs.push(ctrl);
    }

    pub fn iter(&self) -> impl Iterator<Item = &BufCtrl> {
        self.bufs.iter()
    }
}

/// 持有 `cur_idx` 号桶的锁时，回收扫描能否再获取 `req_idx` 号桶的锁。
///
/// 若线程 A 按 cur->req 加锁而线程 B 按 req->cur 加锁就会死锁，
/// 所以把桶看作单向的环，只允许"距离"超过环长一半的方向：
/// - 同一个桶：不可重入，返回 `false`；
/// - `cur_idx < req_idx`：仅当 `req_idx > cur_idx + mid`；
/// - `cur_idx > req_idx`：仅当 `cur_idx < req_idx + mid`。
///
/// 其中 `mid = nbucket / 2`。对任意一对不同的桶，两个方向至多有一个被允许。
/// 两侧边界条件不对称，不能随意改成同一种比较。
pub fn can_lock(cur_idx: usize, req_idx: usize, nbucket: usize) -> bool {
    let mid = nbucket / 2;
    if cur_idx == req_idx {
        false
    } else if cur_idx < req_idx {
        req_idx > cur_idx + mid
    } else {
        cur_idx < req_idx + mid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::fs::NBUCKET;

    fn reachable(cur: usize, nbucket: usize) -> Vec<usize> {
        (0..nbucket).filter(|&j| can_lock(cur, j, nbucket)).collect()
    }

    #[test]
    fn ring_reachability_for_kernel_geometry() {
        assert_eq!(NBUCKET, 13);
        assert_eq!(reachable(0, NBUCKET), vec![7, 8, 9, 10, 11, 12]);
        assert_eq!(reachable(1, NBUCKET), vec![0, 8, 9, 10, 11, 12]);
        assert_eq!(reachable(6, NBUCKET), vec![1, 2, 3, 4, 5]);
        assert_eq!(reachable(7, NBUCKET), vec![2, 3, 4, 5, 6]);
        assert_eq!(reachable(12, NBUCKET), vec![7, 8, 9, 10, 11]);
    }

    #[test]
    fn midpoint_boundaries() {
        // 向前：恰好 mid 远不可加锁，mid + 1 远可以
        assert!(!can_lock(0, 6, 13));
        assert!(can_lock(0, 7, 13));
        // 向后：差值恰好为 mid 不可加锁，小于 mid 可以
        assert!(!can_lock(6, 0, 13));
        assert!(can_lock(5, 0, 13));
        // 偶数桶数
        assert!(!can_lock(0, 2, 4));
        assert!(can_lock(0, 3, 4));
        assert!(!can_lock(2, 0, 4));
        assert!(can_lock(1, 0, 4));
    }

    #[test]
    fn never_reentrant() {
        for n in 1..=64 {
            for i in 0..n {
                assert!(!can_lock(i, i, n));
            }
        }
    }

    #[test]
    fn no_pair_is_mutually_lockable() {
        for n in 1..=64 {
            for i in 0..n {
                for j in 0..n {
                    assert!(
                        !(can_lock(i, j, n) && can_lock(j, i, n)),
                        "buckets {} and {} of {} lock each other",
                        i,
                        j,
                        n
                    );
                }
            }
        }
    }

    #[test]
    fn two_buckets_never_cross_lock() {
        assert!(reachable(0, 2).is_empty());
        assert!(reachable(1, 2).is_empty());
    }

    #[test]
    fn lru_free_picks_oldest_unreferenced() {
        let mut list = BufList::pristine(4);
        for (i, b) in list.bufs.iter_mut().enumerate() {
            b.dev = 1;
            b.blockno = i as u32;
            b.time = 10 - i as u32;
        }
        // 最旧的正被引用，不能选
        list.get_mut(3).unwrap().refcnt = 1;
        assert_eq!(list.lru_free(), Some((2, 8)));

        list.get_mut(2).unwrap().refcnt = 2;
        list.get_mut(1).unwrap().refcnt = 1;
        list.get_mut(0).unwrap().refcnt = 1;
        assert_eq!(list.lru_free(), None);
    }

    #[test]
    fn lru_free_breaks_ties_by_position() {
        let list = BufList::pristine(3);
        assert_eq!(list.lru_free(), Some((0, 0)));
    }

    #[test]
    fn take_and_append_keep_order() {
        let mut list = BufList::pristine(4);
        let ctrl = list.take(1);
        assert_eq!(ctrl.index, 1);
        assert_eq!(list.len(), 3);
        list.append(ctrl);
        let order: Vec<usize> = list.iter().map(|b| b.index).collect();
        assert_eq!(order, vec![0, 2, 3, 1]);
    }

    #[test]
    fn pristine_buffers_alias_no_block() {
        let mut list = BufList::pristine(2);
        assert!(list.find_cached(0, 0).is_none());
        assert!(list.find_cached(1, 0).is_none());
    }
}
