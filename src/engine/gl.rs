//! ### English
//! GL context seam. Everything the pipeline does to GL goes through [`GlContext`], which is only
//! ever used on the GL thread. The production implementation is built on surfman + glow.
//!
//! ### 中文
//! GL 上下文接缝。pipeline 对 GL 的所有操作都经过 [`GlContext`]，且只在 GL 线程使用。
//! 生产实现基于 surfman + glow。

mod scope;
pub mod shaders;
mod surfman_context;

use dpi::PhysicalSize;

use crate::engine::error::GlError;
use crate::engine::matrix::Mat4;
use crate::engine::pipeline::Effect;

pub use scope::TargetScope;
pub use surfman_context::SurfmanGlContext;

/// ### English
/// Opaque handle of a render target created by a [`GlContext`].
///
/// ### 中文
/// 由 [`GlContext`] 创建的渲染目标的不透明句柄。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RenderTarget(pub u32);

/// ### English
/// What kind of render target to create.
///
/// ### 中文
/// 要创建的渲染目标类型。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetRequest {
    /// ### English
    /// A presentable window surface. `native_window` is the platform window pointer as an
    /// address (e.g. `ANativeWindow*`); it is only dereferenced on the GL thread.
    ///
    /// ### 中文
    /// 可呈现的窗口 surface。`native_window` 为平台窗口指针的地址值（例如 `ANativeWindow*`），
    /// 仅在 GL 线程解引用。
    Window {
        native_window: usize,
        size: PhysicalSize<u32>,
    },
    /// ### English
    /// An offscreen framebuffer backed by an RGBA texture.
    ///
    /// ### 中文
    /// 由 RGBA 纹理支撑的离屏 framebuffer。
    Offscreen { size: PhysicalSize<u32> },
}

/// ### English
/// Viewport rectangle in pixels.
///
/// ### 中文
/// 以像素为单位的视口矩形。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Viewport {
    pub fn full(width: i32, height: i32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

/// ### English
/// One textured full-viewport quad draw.
///
/// ### 中文
/// 一次铺满视口的纹理四边形绘制。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawPass {
    pub texture_id: u32,
    pub is_oes: bool,
    pub tex_matrix: Mat4,
    pub mvp: Mat4,
    pub effect: Effect,
    pub params: [f32; 4],
}

/// ### English
/// GL operations used by the pipeline. Implementations are bound to the thread that created
/// them (the GL thread) and are never shared across threads.
///
/// ### 中文
/// pipeline 使用的 GL 操作。实现绑定在创建它的线程（GL 线程）上，绝不跨线程共享。
pub trait GlContext {
    /// ### English
    /// Whether the context is GLES 3.x.
    ///
    /// ### 中文
    /// 上下文是否为 GLES 3.x。
    fn is_gles3(&self) -> bool;

    fn create_target(&mut self, request: TargetRequest) -> Result<RenderTarget, GlError>;

    /// ### English
    /// Resizes an offscreen target's storage (windows follow their native surface).
    ///
    /// ### 中文
    /// 调整离屏目标的存储尺寸（窗口目标跟随其原生 surface）。
    fn resize_target(
        &mut self,
        target: RenderTarget,
        size: PhysicalSize<u32>,
    ) -> Result<(), GlError>;

    /// ### English
    /// Releases a target. Unknown targets are ignored.
    ///
    /// ### 中文
    /// 释放目标；未知目标会被忽略。
    fn release_target(&mut self, target: RenderTarget);

    /// ### English
    /// Color texture of an offscreen target.
    ///
    /// ### 中文
    /// 离屏目标的颜色纹理。
    fn target_texture(&self, target: RenderTarget) -> Option<u32>;

    fn make_current(&mut self, target: RenderTarget) -> Result<(), GlError>;

    /// ### English
    /// Presents a window target or flushes an offscreen one.
    ///
    /// ### 中文
    /// 呈现窗口目标，或对离屏目标执行 flush。
    fn swap(&mut self, target: RenderTarget) -> Result<(), GlError>;

    fn set_viewport(&mut self, viewport: Viewport);

    fn clear(&mut self, rgba: [f32; 4]);

    fn draw(&mut self, pass: &DrawPass) -> Result<(), GlError>;

    /// ### English
    /// Reads RGBA8 pixels from the current target, bottom row first (GL origin).
    ///
    /// ### 中文
    /// 从当前目标读取 RGBA8 像素，自底行开始（GL 原点）。
    fn read_pixels(&mut self, width: u32, height: u32) -> Result<Vec<u8>, GlError>;
}
