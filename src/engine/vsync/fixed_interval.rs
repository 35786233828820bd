//! ### English
//! Frame source that fires at a fixed interval on the GL thread (`target_fps != 0` path).
//!
//! ### 中文
//! 在 GL 线程上按固定间隔触发的帧源（`target_fps != 0` 路径）。

use std::time::{Duration, Instant};

use tracing::debug;

use crate::engine::gl_thread::GlThreadHandle;

use super::{FrameCallback, FrameCallbackSource};

/// ### English
/// Fixed-interval frame source backed by the GL thread's delayed queue
/// (no dedicated timer thread).
///
/// ### 中文
/// 基于 GL 线程延迟队列的固定间隔帧源（不额外创建计时线程）。
pub struct FixedIntervalFrameSource {
    handle: GlThreadHandle,
    interval: Duration,
    /// ### English
    /// Origin of the frame times handed to callbacks.
    ///
    /// ### 中文
    /// 传给回调的帧时间的起点。
    origin: Instant,
}

impl FixedIntervalFrameSource {
    /// ### English
    /// Creates a fixed-interval frame source.
    ///
    /// #### Parameters
    /// - `handle`: GL thread the callbacks run on.
    /// - `interval`: Frame duration.
    ///
    /// ### 中文
    /// 创建固定间隔帧源。
    ///
    /// #### 参数
    /// - `handle`：回调所在的 GL 线程。
    /// - `interval`：帧间隔。
    pub fn new(handle: GlThreadHandle, interval: Duration) -> Self {
        Self {
            handle,
            interval,
            origin: Instant::now(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl FrameCallbackSource for FixedIntervalFrameSource {
    fn post_frame_callback(&self, callback: FrameCallback) {
        let origin = self.origin;
        let posted = self
            .handle
            .post_delayed(self.interval, move |_| callback(origin.elapsed()));
        if posted.is_err() {
            debug!("frame callback dropped: GL thread stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::GlThreadConfig;
    use crate::engine::gl::GlContext;
    use crate::engine::gl_thread::GlThread;
    use crate::engine::test_support::RecordingGl;
    use crossbeam_channel as channel;

    #[test]
    fn fires_on_gl_thread_after_interval() {
        let thread = GlThread::spawn(&GlThreadConfig::default(), || {
            Ok(Box::new(RecordingGl::new()) as Box<dyn GlContext>)
        })
        .expect("spawn");
        let handle = thread.handle();
        let source = FixedIntervalFrameSource::new(handle.clone(), Duration::from_millis(10));

        let (tx, rx) = channel::bounded(1);
        let started = Instant::now();
        source.post_frame_callback(Box::new(move |time| {
            let _ = tx.send((handle.is_gl_thread(), time));
        }));

        let (on_gl_thread, time) = rx.recv_timeout(Duration::from_secs(2)).expect("frame");
        assert!(on_gl_thread);
        assert!(started.elapsed() >= Duration::from_millis(10));
        assert!(time >= Duration::from_millis(10));
    }
}
