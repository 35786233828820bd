/// ### English
/// `gl_pipeline` crate root.
/// A GL frame pipeline driven by a dedicated GL thread: producers feed frames into a chain of
/// stages (effects, capture, presentation); `GlView` drives a window surface's draw loop.
/// Core implementation lives under `engine`.
///
/// ### 中文
/// `gl_pipeline` 的 crate 根。
/// 由专用 GL 线程驱动的 GL 帧管线：生产者把帧送入阶段链（特效、截图、呈现）；
/// `GlView` 驱动窗口 surface 的绘制循环。核心实现位于 `engine` 模块。
mod engine;

pub use engine::config::{CaptureConfig, GlThreadConfig, PipelineConfig, ViewConfig};
pub use engine::error::{GlError, PipelineError, Result};
pub use engine::frame::Frame;
pub use engine::gl::{
    DrawPass, GlContext, RenderTarget, SurfmanGlContext, TargetRequest, TargetScope, Viewport,
};
pub use engine::gl_thread::{CallbackExecutor, GlTask, GlThread, GlThreadHandle};
pub use engine::matrix::{self, IDENTITY, Mat4};
pub use engine::pipeline::{
    BitmapListener, CaptureControl, Effect, EffectControl, EffectDrawer, EffectParams,
    EffectSnapshot, Flow, FrameProducer, GlEffectDrawer, GlPipeline, MediaEffectStage, MirrorMode,
    OnFrameStage, PipelineChain, PresenterStage, ProducerTexture, ProxyStage, Stage, StageId,
    StageKind, SurfaceCaptureStage, SurfaceReceiverStage,
};
pub use engine::view::{GlRenderer, GlView};
pub use engine::vsync::{
    FixedIntervalFrameSource, FrameCallback, FrameCallbackSource, VsyncCallbackQueue,
};
