//! ### English
//! Frame capture: reads frames back into RGBA bitmaps on request, optionally repeating at an
//! interval, and hands them to a listener.
//!
//! ### 中文
//! 截帧：按请求把帧读回为 RGBA 位图（可按间隔重复），并交给监听者。

use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dpi::PhysicalSize;
use image::RgbaImage;
use tracing::{debug, trace, warn};

use crate::engine::error::{GlError, PipelineError, Result};
use crate::engine::frame::Frame;
use crate::engine::gl::{
    DrawPass, GlContext, RenderTarget, TargetRequest, TargetScope, Viewport,
};
use crate::engine::gl_thread::CallbackExecutor;
use crate::engine::matrix::IDENTITY;

use super::{Effect, Flow, Stage, StageKind};

/// ### English
/// Receives captured bitmaps (top row first).
///
/// ### 中文
/// 接收截取到的位图（首行为顶部）。
pub type BitmapListener = Arc<dyn Fn(RgbaImage) + Send + Sync + 'static>;

/// ### English
/// Count value meaning "capture until cancelled".
///
/// ### 中文
/// 表示“持续截取直到取消”的计数值。
const UNBOUNDED: i32 = -1;

#[derive(Debug, Default)]
struct CaptureRequest {
    /// ### English
    /// `-1` unbounded, `0` idle, `> 0` captures left.
    ///
    /// ### 中文
    /// `-1` 无限，`0` 空闲，`> 0` 剩余截取次数。
    remaining: i32,
    interval: Duration,
    /// ### English
    /// Frame timestamp at which the next capture may fire (`None` = next frame).
    ///
    /// ### 中文
    /// 下一次截取可以触发的帧时间戳（`None` 表示下一帧）。
    next_due: Option<Duration>,
    /// ### English
    /// Bumped by every trigger and cancel; a capture only consumes the request it started on.
    ///
    /// ### 中文
    /// 每次触发与取消都会递增；一次截取只消耗它开始时对应的那个请求。
    armed: u64,
}

impl CaptureRequest {
    /// ### English
    /// Arm sequence of the request when a capture is due at `timestamp`.
    ///
    /// ### 中文
    /// 若在 `timestamp` 应当截取，返回当前请求的触发序号。
    fn due(&self, timestamp: Duration) -> Option<u64> {
        let due = self.remaining != 0 && self.next_due.is_none_or(|due| timestamp >= due);
        due.then_some(self.armed)
    }

    /// ### English
    /// Counts a capture against the request armed as `armed`. Returns `false` (and changes
    /// nothing) when the request was re-armed or cancelled meanwhile.
    ///
    /// ### 中文
    /// 把一次截取计入序号为 `armed` 的请求。若该请求期间已被重新触发或取消，则返回
    /// `false` 且不做任何修改。
    fn consume(&mut self, armed: u64, timestamp: Duration) -> bool {
        if self.armed != armed {
            return false;
        }
        if self.remaining > 0 {
            self.remaining -= 1;
        }
        self.next_due = Some(timestamp + self.interval);
        true
    }
}

/// ### English
/// Thread-safe trigger of a [`SurfaceCaptureStage`]. The interval is measured on frame
/// timestamps, so captures follow the producer's clock.
///
/// ### 中文
/// [`SurfaceCaptureStage`] 的线程安全触发器。间隔以帧时间戳计量，因此截取跟随生产者的时钟。
#[derive(Clone, Default)]
pub struct CaptureControl {
    request: Arc<Mutex<CaptureRequest>>,
    default_interval: Duration,
}

impl CaptureControl {
    pub fn new(default_interval: Duration) -> Self {
        Self {
            request: Arc::default(),
            default_interval,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CaptureRequest> {
        self.request.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// ### English
    /// Captures the next frame once.
    ///
    /// ### 中文
    /// 截取下一帧一次。
    pub fn trigger(&self) {
        self.arm(1, self.default_interval);
    }

    /// ### English
    /// Captures `count` frames at least `interval` apart.
    ///
    /// #### Parameters
    /// - `count`: `-1` until cancelled, `0` cancels, `> 0` fixed number of captures.
    /// - `interval`: Minimum frame-timestamp distance between two captures.
    ///
    /// ### 中文
    /// 截取 `count` 帧，相邻两次至少相隔 `interval`。
    ///
    /// #### 参数
    /// - `count`：`-1` 表示直到取消，`0` 表示取消，`> 0` 表示固定次数。
    /// - `interval`：两次截取之间最小的帧时间戳间隔。
    pub fn trigger_with(&self, count: i32, interval: Duration) -> Result<()> {
        match count {
            0 => self.cancel(),
            UNBOUNDED => self.arm(UNBOUNDED, interval),
            n if n > 0 => self.arm(n, interval),
            n => return Err(PipelineError::InvalidCaptureCount(n)),
        }
        Ok(())
    }

    fn arm(&self, count: i32, interval: Duration) {
        let mut request = self.lock();
        let armed = request.armed.wrapping_add(1);
        *request = CaptureRequest {
            remaining: count,
            interval,
            next_due: None,
            armed,
        };
        debug!(count, ?interval, "capture triggered");
    }

    pub fn cancel(&self) {
        let mut request = self.lock();
        if request.remaining != 0 {
            debug!(remaining = request.remaining, "capture cancelled");
        }
        request.remaining = 0;
        request.armed = request.armed.wrapping_add(1);
    }

    pub fn is_capturing(&self) -> bool {
        self.lock().remaining != 0
    }
}

/// ### English
/// Pass-through stage that reads frames back when its [`CaptureControl`] asks for it.
///
/// ### 中文
/// 直通阶段：当 [`CaptureControl`] 请求时把帧读回。
pub struct SurfaceCaptureStage {
    control: CaptureControl,
    listener: BitmapListener,
    executor: Arc<dyn CallbackExecutor>,
    target: Option<(RenderTarget, PhysicalSize<u32>)>,
}

impl SurfaceCaptureStage {
    /// ### English
    /// Creates a capture stage.
    ///
    /// #### Parameters
    /// - `control`: Trigger shared with the caller.
    /// - `listener`: Receives each bitmap.
    /// - `executor`: Where the listener runs (usually the GL thread handle).
    ///
    /// ### 中文
    /// 创建截帧阶段。
    ///
    /// #### 参数
    /// - `control`：与调用方共享的触发器。
    /// - `listener`：接收每一张位图。
    /// - `executor`：监听者的执行位置（通常为 GL 线程句柄）。
    pub fn new(
        control: CaptureControl,
        listener: BitmapListener,
        executor: Arc<dyn CallbackExecutor>,
    ) -> Self {
        Self {
            control,
            listener,
            executor,
            target: None,
        }
    }

    pub fn control(&self) -> CaptureControl {
        self.control.clone()
    }

    fn capture_target(
        &mut self,
        gl: &mut dyn GlContext,
        size: PhysicalSize<u32>,
    ) -> std::result::Result<RenderTarget, GlError> {
        match self.target {
            Some((target, current)) if current == size => Ok(target),
            Some((target, _)) => {
                gl.resize_target(target, size)?;
                self.target = Some((target, size));
                Ok(target)
            }
            None => {
                let target = gl.create_target(TargetRequest::Offscreen { size })?;
                self.target = Some((target, size));
                Ok(target)
            }
        }
    }

    fn read_frame(
        &mut self,
        gl: &mut dyn GlContext,
        frame: &Frame,
    ) -> std::result::Result<RgbaImage, GlError> {
        let (width, height) = (frame.width(), frame.height());
        let target = self.capture_target(gl, frame.size)?;

        let mut pixels = {
            let mut scope = TargetScope::enter(gl, target)?;
            scope.set_viewport(Viewport::full(width as i32, height as i32));
            scope.draw(&DrawPass {
                texture_id: frame.texture_id,
                is_oes: frame.is_oes,
                tex_matrix: frame.tex_matrix,
                mvp: IDENTITY,
                effect: Effect::None,
                params: [0.0; 4],
            })?;
            scope.read_pixels(width, height)?
        };

        /*
        ### English
        Flip rows: GL reads bottom-up, bitmaps are top-down.

        ### 中文
        翻转行序：GL 自底向上读取，位图自顶向下存储。
        */
        let stride = width as usize * 4;
        let rows = height as usize;
        if pixels.len() != stride * rows {
            return Err(GlError::Readback(format!(
                "got {} bytes for {width}x{height}",
                pixels.len()
            )));
        }
        for y in 0..(rows / 2) {
            let top_start = y * stride;
            let bottom_start = (rows - y - 1) * stride;
            let (head, tail) = pixels.split_at_mut(bottom_start);
            head[top_start..top_start + stride].swap_with_slice(&mut tail[..stride]);
        }

        RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| GlError::Readback(format!("bad bitmap layout for {width}x{height}")))
    }
}

impl Stage for SurfaceCaptureStage {
    fn kind(&self) -> StageKind {
        StageKind::SurfaceCapture
    }

    fn on_frame(&mut self, gl: &mut dyn GlContext, frame: &Frame) -> Result<Flow> {
        let Some(armed) = self.control.lock().due(frame.timestamp) else {
            return Ok(Flow::Forward(*frame));
        };

        match self.read_frame(gl, frame) {
            Ok(bitmap) => {
                if !self.control.lock().consume(armed, frame.timestamp) {
                    trace!("capture request re-armed during readback, left untouched");
                }
                trace!(
                    width = bitmap.width(),
                    height = bitmap.height(),
                    "frame captured"
                );
                let listener = self.listener.clone();
                self.executor.execute(Box::new(move || listener(bitmap)));
            }
            Err(err) => warn!(%err, "frame capture failed"),
        }
        Ok(Flow::Forward(*frame))
    }

    fn release(&mut self, gl: &mut dyn GlContext) {
        if let Some((target, _)) = self.target.take() {
            gl.release_target(target);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
