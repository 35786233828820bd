//! ### English
//! Per-frame callback sources driving the view draw loop.
//! [`VsyncCallbackQueue`] is ticked by the platform vsync (Choreographer equivalent);
//! [`FixedIntervalFrameSource`] paces frames on the GL thread itself.
//!
//! ### 中文
//! 驱动 view 绘制循环的逐帧回调源。
//! [`VsyncCallbackQueue`] 由平台 vsync（相当于 Choreographer）tick 驱动；
//! [`FixedIntervalFrameSource`] 在 GL 线程自身上按固定间隔出帧。

mod fixed_interval;

use std::time::Duration;

use crossbeam_channel as channel;
use tracing::{trace, warn};

pub use fixed_interval::FixedIntervalFrameSource;

/// ### English
/// One-shot frame callback; the argument is the frame time.
///
/// ### 中文
/// 一次性帧回调；参数为帧时间。
pub type FrameCallback = Box<dyn FnOnce(Duration) + Send + 'static>;

/// ### English
/// Something that calls registered callbacks once on its next frame.
///
/// ### 中文
/// 在下一帧调用一次已注册回调的帧源。
pub trait FrameCallbackSource: Send + Sync {
    /// ### English
    /// Registers `callback` for the next frame only.
    ///
    /// #### Parameters
    /// - `callback`: Callback executed once on the next frame.
    ///
    /// ### 中文
    /// 仅为下一帧注册 `callback`。
    ///
    /// #### 参数
    /// - `callback`：在下一帧执行一次的回调。
    fn post_frame_callback(&self, callback: FrameCallback);
}

/// ### English
/// Queue of frame callbacks drained by an external vsync tick.
///
/// Any thread may enqueue; `tick` runs callbacks on the ticking thread. Callbacks registered
/// while a tick is running are deferred to the next tick.
///
/// ### 中文
/// 由外部 vsync tick drain 的帧回调队列。
///
/// 任意线程均可入队；`tick` 在调用 tick 的线程上执行回调。tick 执行期间注册的回调
/// 延后到下一次 tick。
pub struct VsyncCallbackQueue {
    sender: channel::Sender<FrameCallback>,
    receiver: channel::Receiver<FrameCallback>,
}

impl VsyncCallbackQueue {
    /// ### English
    /// Creates a queue holding at most `capacity` pending callbacks; extra callbacks are
    /// dropped with a warning (a stalled tick must not grow memory without bound).
    ///
    /// ### 中文
    /// 创建最多容纳 `capacity` 个待执行回调的队列；超出部分会被丢弃并输出警告
    /// （tick 停滞时不得无限增长内存）。
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, receiver) = channel::bounded(capacity.max(1));
        Self { sender, receiver }
    }

    /// ### English
    /// Runs every callback queued before this call.
    ///
    /// #### Parameters
    /// - `frame_time`: Frame time handed to each callback.
    ///
    /// ### 中文
    /// 执行本次调用之前入队的所有回调。
    ///
    /// #### 参数
    /// - `frame_time`：传给每个回调的帧时间。
    pub fn tick(&self, frame_time: Duration) {
        let due = self.receiver.len();
        trace!(due, "vsync tick");
        for _ in 0..due {
            match self.receiver.try_recv() {
                Ok(callback) => callback(frame_time),
                Err(_) => break,
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}

impl FrameCallbackSource for VsyncCallbackQueue {
    fn post_frame_callback(&self, callback: FrameCallback) {
        if self.sender.try_send(callback).is_err() {
            warn!("vsync callback queue full, dropping frame callback");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn tick_runs_only_callbacks_queued_before_it() {
        let queue = Arc::new(VsyncCallbackQueue::with_capacity(16));
        let runs = Arc::new(AtomicUsize::new(0));

        let requeue = queue.clone();
        let counter = runs.clone();
        queue.post_frame_callback(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            let counter = counter.clone();
            requeue.post_frame_callback(Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }));

        queue.tick(Duration::from_millis(16));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(queue.pending(), 1);

        queue.tick(Duration::from_millis(33));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn passes_frame_time() {
        let queue = VsyncCallbackQueue::with_capacity(4);
        let (tx, rx) = channel::unbounded();
        queue.post_frame_callback(Box::new(move |time| {
            let _ = tx.send(time);
        }));
        queue.tick(Duration::from_millis(42));
        assert_eq!(rx.try_recv(), Ok(Duration::from_millis(42)));
    }

    #[test]
    fn overflow_is_dropped() {
        let queue = VsyncCallbackQueue::with_capacity(2);
        for _ in 0..5 {
            queue.post_frame_callback(Box::new(|_| {}));
        }
        assert_eq!(queue.pending(), 2);
    }
}
