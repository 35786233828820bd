//! ### English
//! GL view: tracks a window surface's lifecycle and drives a per-frame draw loop on the GL
//! thread while the surface exists.
//!
//! ### 中文
//! GL view：跟踪窗口 surface 的生命周期，并在 surface 存在期间于 GL 线程上驱动逐帧绘制循环。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dpi::PhysicalSize;
use tracing::{debug, trace, warn};

use crate::engine::config::ViewConfig;
use crate::engine::error::{GlError, Result};
use crate::engine::gl::{GlContext, RenderTarget, TargetRequest, TargetScope, Viewport};
use crate::engine::gl_thread::GlThreadHandle;
use crate::engine::matrix::{IDENTITY, Mat4};
use crate::engine::vsync::{FixedIntervalFrameSource, FrameCallbackSource, VsyncCallbackQueue};

/// ### English
/// Rendering callbacks of a [`GlView`]. Every method runs on the GL thread with the view's
/// surface current.
///
/// ### 中文
/// [`GlView`] 的渲染回调。所有方法都在 GL 线程上、view 的 surface 为 current 时执行。
pub trait GlRenderer: Send + 'static {
    fn on_surface_created(&mut self, _gl: &mut dyn GlContext) {}

    fn on_surface_changed(&mut self, _gl: &mut dyn GlContext, _width: u32, _height: u32) {}

    /// ### English
    /// Called before `draw_frame` whenever the view transform changed.
    ///
    /// ### 中文
    /// 每当 view 变换矩阵发生变化时，在 `draw_frame` 之前调用。
    fn apply_transform(&mut self, _gl: &mut dyn GlContext, _transform: &Mat4) {}

    fn draw_frame(&mut self, gl: &mut dyn GlContext) -> std::result::Result<(), GlError>;

    fn on_surface_destroyed(&mut self, _gl: &mut dyn GlContext) {}
}

struct TransformState {
    matrix: Mat4,
    dirty: bool,
}

/// ### English
/// GL-thread-only state; the mutex only makes it shareable with posted tasks.
///
/// ### 中文
/// 仅 GL 线程使用的状态；互斥锁只是为了能与投递的任务共享。
struct SurfaceState {
    target: Option<RenderTarget>,
    size: PhysicalSize<u32>,
    renderer: Box<dyn GlRenderer>,
}

struct ViewInner {
    handle: GlThreadHandle,
    frames: Arc<dyn FrameCallbackSource>,
    has_surface: AtomicBool,
    /// ### English
    /// Bumped on every teardown and when a surface replaces a live one; frame callbacks carrying
    /// an older value are stale.
    ///
    /// ### 中文
    /// 每次 teardown 以及新 surface 替换仍存活的 surface 时递增；携带旧值的帧回调即视为过期。
    generation: AtomicU64,
    transform: Mutex<TransformState>,
    surface: Mutex<SurfaceState>,
}

impl ViewInner {
    fn lock_transform(&self) -> MutexGuard<'_, TransformState> {
        self.transform.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_surface(&self) -> MutexGuard<'_, SurfaceState> {
        self.surface.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_live(&self, generation: u64) -> bool {
        self.has_surface.load(Ordering::Acquire)
            && self.generation.load(Ordering::Acquire) == generation
    }

    /// ### English
    /// Registers the next frame callback; the frame itself always runs on the GL thread.
    ///
    /// ### 中文
    /// 注册下一次帧回调；帧本身总是在 GL 线程上执行。
    fn request_frame(self: &Arc<Self>, generation: u64) {
        let inner = self.clone();
        self.frames.post_frame_callback(Box::new(move |frame_time| {
            if !inner.is_live(generation) {
                return;
            }
            let view = inner.clone();
            let posted = inner
                .handle
                .post(move |gl| view.do_frame(gl, generation, frame_time));
            if posted.is_err() {
                debug!("frame dropped: GL thread stopped");
            }
        }));
    }

    fn do_frame(self: &Arc<Self>, gl: &mut dyn GlContext, generation: u64, frame_time: Duration) {
        if !self.is_live(generation) {
            trace!(generation, "stale frame callback ignored");
            return;
        }

        let mut surface = self.lock_surface();
        let Some(target) = surface.target else {
            return;
        };
        self.request_frame(generation);
        let mut scope = match TargetScope::enter(gl, target) {
            Ok(scope) => scope,
            Err(err) => {
                warn!(%err, "failed to make view surface current");
                return;
            }
        };

        let transform = {
            let mut state = self.lock_transform();
            let dirty = std::mem::take(&mut state.dirty);
            dirty.then_some(state.matrix)
        };
        if let Some(transform) = transform {
            surface.renderer.apply_transform(&mut *scope, &transform);
        }
        trace!(?frame_time, "view frame");
        if let Err(err) = surface.renderer.draw_frame(&mut *scope) {
            warn!(%err, "view draw failed");
        }
    }

    /// ### English
    /// GL-side teardown: ends the frame loop and releases the window target if one exists.
    ///
    /// ### 中文
    /// GL 侧清理：结束帧循环，若存在窗口目标则将其释放。
    fn release_surface(&self, gl: &mut dyn GlContext) {
        self.has_surface.store(false, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);

        let mut surface = self.lock_surface();
        let Some(target) = surface.target.take() else {
            return;
        };
        if gl.make_current(target).is_ok() {
            surface.renderer.on_surface_destroyed(gl);
        }
        gl.release_target(target);
        debug!("view surface destroyed");
    }
}

/// ### English
/// Surface lifecycle state machine plus frame loop. Lifecycle calls come from the platform
/// (UI) thread; all GL work is posted onto the GL thread.
///
/// ### 中文
/// surface 生命周期状态机与帧循环。生命周期调用来自平台（UI）线程；所有 GL 工作都投递到
/// GL 线程执行。
pub struct GlView {
    inner: Arc<ViewInner>,
}

impl GlView {
    /// ### English
    /// Creates a view.
    ///
    /// #### Parameters
    /// - `handle`: GL thread that owns the view surface.
    /// - `frames`: Frame callback source pacing the draw loop.
    /// - `renderer`: Rendering callbacks.
    ///
    /// ### 中文
    /// 创建 view。
    ///
    /// #### 参数
    /// - `handle`：持有 view surface 的 GL 线程。
    /// - `frames`：为绘制循环定节奏的帧回调源。
    /// - `renderer`：渲染回调。
    pub fn new(
        handle: GlThreadHandle,
        frames: Arc<dyn FrameCallbackSource>,
        renderer: impl GlRenderer,
    ) -> Self {
        Self {
            inner: Arc::new(ViewInner {
                handle,
                frames,
                has_surface: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                transform: Mutex::new(TransformState {
                    matrix: IDENTITY,
                    dirty: false,
                }),
                surface: Mutex::new(SurfaceState {
                    target: None,
                    size: PhysicalSize::new(0, 0),
                    renderer: Box::new(renderer),
                }),
            }),
        }
    }

    /// ### English
    /// Creates a view paced by `config.target_fps`: a fixed interval on the GL thread when
    /// non-zero, otherwise the external vsync queue.
    ///
    /// ### 中文
    /// 按 `config.target_fps` 创建 view：非零时在 GL 线程上按固定间隔出帧，否则使用外部
    /// vsync 队列。
    pub fn with_config(
        handle: GlThreadHandle,
        config: &ViewConfig,
        renderer: impl GlRenderer,
        vsync: Arc<VsyncCallbackQueue>,
    ) -> Self {
        let frames: Arc<dyn FrameCallbackSource> = match config.frame_interval() {
            Some(interval) => Arc::new(FixedIntervalFrameSource::new(handle.clone(), interval)),
            None => vsync,
        };
        Self::new(handle, frames, renderer)
    }

    /// ### English
    /// The platform created the window surface. Ignored unless both dimensions are positive.
    ///
    /// #### Parameters
    /// - `native_window`: Platform window pointer as an address.
    /// - `width`: Surface width in pixels.
    /// - `height`: Surface height in pixels.
    ///
    /// ### 中文
    /// 平台已创建窗口 surface。仅当宽高均为正数时生效。
    ///
    /// #### 参数
    /// - `native_window`：平台窗口指针的地址值。
    /// - `width`：surface 宽度（像素）。
    /// - `height`：surface 高度（像素）。
    pub fn surface_created(&self, native_window: usize, width: i32, height: i32) -> Result<()> {
        if width <= 0 || height <= 0 {
            debug!(width, height, "surface_created ignored for empty size");
            return Ok(());
        }
        let size = PhysicalSize::new(width as u32, height as u32);
        let inner = self.inner.clone();
        self.inner.handle.post(move |gl| {
            let generation = {
                let mut surface = inner.lock_surface();
                if let Some(old) = surface.target.take() {
                    // The old surface's frame loop must not outlive it.
                    inner.generation.fetch_add(1, Ordering::AcqRel);
                    gl.release_target(old);
                }
                let generation = inner.generation.load(Ordering::Acquire);
                let target = match gl.create_target(TargetRequest::Window {
                    native_window,
                    size,
                }) {
                    Ok(target) => target,
                    Err(err) => {
                        warn!(%err, "failed to create view surface");
                        return;
                    }
                };
                surface.target = Some(target);
                surface.size = size;

                inner.has_surface.store(true, Ordering::Release);
                inner.lock_transform().dirty = true;

                if let Err(err) = gl.make_current(target) {
                    warn!(%err, "failed to make view surface current");
                }
                gl.set_viewport(Viewport::full(width, height));
                surface.renderer.on_surface_created(gl);
                generation
            };
            inner.request_frame(generation);
            debug!(width, height, "view surface created");
        })
    }

    /// ### English
    /// The window surface changed size. The surface itself is kept.
    ///
    /// ### 中文
    /// 窗口 surface 尺寸改变；surface 本身保持不变。
    pub fn surface_changed(&self, width: i32, height: i32) -> Result<()> {
        if width <= 0 || height <= 0 {
            debug!(width, height, "surface_changed ignored for empty size");
            return Ok(());
        }
        let size = PhysicalSize::new(width as u32, height as u32);
        let inner = self.inner.clone();
        self.inner.handle.post(move |gl| {
            let mut surface = inner.lock_surface();
            let Some(target) = surface.target else {
                return;
            };
            if let Err(err) = gl
                .make_current(target)
                .and_then(|()| gl.resize_target(target, size))
            {
                warn!(%err, "failed to resize view surface");
            }
            surface.size = size;
            gl.set_viewport(Viewport::full(width, height));
            surface
                .renderer
                .on_surface_changed(gl, size.width, size.height);
            debug!(width, height, "view surface changed");
        })
    }

    /// ### English
    /// The platform is destroying the window surface. Stops the frame loop immediately and
    /// drops every GL task posted before this call; the GL teardown runs afterwards.
    ///
    /// ### 中文
    /// 平台即将销毁窗口 surface。立即停止帧循环，并丢弃本调用之前投递的所有 GL 任务；
    /// 随后执行 GL 侧的清理。
    pub fn surface_destroyed(&self) -> Result<()> {
        self.inner.has_surface.store(false, Ordering::Release);
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        self.inner.handle.remove_all_callbacks();

        let inner = self.inner.clone();
        self.inner.handle.post(move |gl| inner.release_surface(gl))
    }

    pub fn has_surface(&self) -> bool {
        self.inner.has_surface.load(Ordering::Acquire)
    }

    /// ### English
    /// Sets the view transform (`None` resets to identity). Applied on the next frame.
    ///
    /// ### 中文
    /// 设置 view 变换矩阵（`None` 重置为单位矩阵），在下一帧生效。
    pub fn set_transform(&self, transform: Option<Mat4>) {
        let mut state = self.inner.lock_transform();
        state.matrix = transform.unwrap_or(IDENTITY);
        state.dirty = true;
    }

    pub fn transform(&self) -> Mat4 {
        self.inner.lock_transform().matrix
    }

    /// ### English
    /// Runs `task` on the GL thread.
    ///
    /// ### 中文
    /// 在 GL 线程上执行 `task`。
    pub fn queue_event<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce(&mut dyn GlContext) + Send + 'static,
    {
        self.inner.handle.post(task)
    }
}

/* ### English
Frame callbacks keep the shared state alive, so dropping the view has to end the frame loop and
release the window target itself. Tasks of other users of the GL thread are left alone.

### 中文
帧回调会让共享状态保持存活，因此 drop view 时必须自行结束帧循环并释放窗口目标。
GL 线程上其他使用者的任务不受影响。
*/
impl Drop for GlView {
    fn drop(&mut self) {
        self.inner.has_surface.store(false, Ordering::Release);
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        let inner = self.inner.clone();
        if self
            .inner
            .handle
            .post(move |gl| inner.release_surface(gl))
            .is_err()
        {
            debug!("GL thread stopped before view teardown");
        }
    }
}
