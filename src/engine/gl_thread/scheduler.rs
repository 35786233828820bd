//! ### English
//! Messages and the delayed-task heap of the GL thread.
//!
//! ### 中文
//! GL 线程的消息类型与延迟任务堆。

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

use super::GlTask;

/// ### English
/// One task together with the callback epoch it was posted in.
///
/// ### 中文
/// 一个任务及其投递时所处的回调 epoch。
pub(super) struct Job {
    pub(super) epoch: u64,
    pub(super) task: GlTask,
}

/// ### English
/// Messages sent from any thread into the GL thread.
///
/// ### 中文
/// 从任意线程发送到 GL 线程的消息。
pub(super) enum Message {
    Run(Job),
    Delayed(ScheduledTask),
    Shutdown,
}

/// ### English
/// One delayed task stored in the internal priority queue.
///
/// `BinaryHeap` is a max-heap, so the ordering is reversed in `Ord` to pop the earliest deadline.
///
/// ### 中文
/// 存储在内部优先队列中的单个延迟任务。
///
/// `BinaryHeap` 是最大堆，因此在 `Ord` 中反转排序以便弹出最早的 deadline。
pub(super) struct ScheduledTask {
    /// ### English
    /// Target time when the task should run.
    ///
    /// ### 中文
    /// 任务应执行的目标时间。
    pub(super) deadline: Instant,
    /// ### English
    /// Monotonic sequence used as a tiebreaker (post order).
    ///
    /// ### 中文
    /// 用作平局判定的单调序号（即投递顺序）。
    pub(super) seq: u64,
    pub(super) job: Job,
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    /// ### English
    /// Reversed ordering so earlier deadlines have higher priority in a max-heap.
    ///
    /// #### Parameters
    /// - `other`: Value to compare against.
    ///
    /// ### 中文
    /// 反转排序：在最大堆中让更早的 deadline 拥有更高优先级。
    ///
    /// #### 参数
    /// - `other`：用于比较的另一个值。
    fn cmp(&self, other: &Self) -> Ordering {
        match other.deadline.cmp(&self.deadline) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}

/// ### English
/// Deadline-ordered queue of delayed tasks, owned by the GL thread.
///
/// ### 中文
/// 按 deadline 排序的延迟任务队列，由 GL 线程持有。
#[derive(Default)]
pub(super) struct DelayedQueue {
    heap: BinaryHeap<ScheduledTask>,
}

impl DelayedQueue {
    pub(super) fn push(&mut self, task: ScheduledTask) {
        self.heap.push(task);
    }

    pub(super) fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|task| task.deadline)
    }

    /// ### English
    /// Pops the earliest task whose deadline is at or before `now`.
    ///
    /// #### Parameters
    /// - `now`: Current time.
    ///
    /// ### 中文
    /// 弹出 deadline 不晚于 `now` 的最早任务。
    ///
    /// #### 参数
    /// - `now`：当前时间。
    pub(super) fn pop_due(&mut self, now: Instant) -> Option<Job> {
        if self.heap.peek()?.deadline > now {
            return None;
        }
        self.heap.pop().map(|task| task.job)
    }
}
