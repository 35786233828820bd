//! ### English
//! GL frame pipeline: a chain of stages that each receive a frame on the GL thread, may draw
//! with it, and forward it (or a new frame) downstream.
//!
//! ### 中文
//! GL 帧管线：由多个阶段组成的链，每个阶段在 GL 线程上接收帧，可以用它绘制，
//! 再把它（或新生成的帧）转发给下游。

mod capture;
mod chain;
mod effect;
mod presenter;
mod proxy;
mod receiver;

use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::engine::error::{PipelineError, Result};
use crate::engine::frame::Frame;
use crate::engine::gl::GlContext;
use crate::engine::gl_thread::GlThreadHandle;

pub use capture::{BitmapListener, CaptureControl, SurfaceCaptureStage};
pub use chain::{PipelineChain, StageId};
pub use effect::{
    EffectControl, EffectDrawer, EffectParams, EffectSnapshot, GlEffectDrawer, MediaEffectStage,
    MirrorMode,
};
pub use presenter::PresenterStage;
pub use proxy::{OnFrameStage, ProxyStage};
pub use receiver::{FrameProducer, ProducerTexture, SurfaceReceiverStage};

// `Effect` lives with the effect stage but is shared with the GL layer.
pub use effect::Effect;

/// ### English
/// Kind tag used by [`PipelineChain::find`].
///
/// ### 中文
/// [`PipelineChain::find`] 使用的阶段类型标签。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageKind {
    Proxy,
    OnFrame,
    MediaEffect,
    SurfaceReceiver,
    SurfaceCapture,
    Presenter,
}

/// ### English
/// What a stage does with the frame after handling it.
///
/// ### 中文
/// 阶段处理完帧之后的去向。
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Flow {
    /// ### English
    /// Hand this frame to the downstream stage.
    ///
    /// ### 中文
    /// 把该帧交给下游阶段。
    Forward(Frame),
    /// ### English
    /// The frame ends here.
    ///
    /// ### 中文
    /// 帧在此终止。
    Consumed,
}

/// ### English
/// One pipeline stage. Every method runs on the GL thread.
///
/// ### 中文
/// 单个管线阶段。所有方法都在 GL 线程上运行。
pub trait Stage: Send + 'static {
    fn kind(&self) -> StageKind;

    /// ### English
    /// Handles one frame.
    ///
    /// #### Parameters
    /// - `gl`: The GL thread's context.
    /// - `frame`: Frame received from upstream.
    ///
    /// ### 中文
    /// 处理一帧。
    ///
    /// #### 参数
    /// - `gl`：GL 线程的上下文。
    /// - `frame`：来自上游的帧。
    fn on_frame(&mut self, gl: &mut dyn GlContext, frame: &Frame) -> Result<Flow>;

    /// ### English
    /// Called after every downstream stage has handled the frame this stage forwarded, also when
    /// a downstream stage failed.
    ///
    /// ### 中文
    /// 在本阶段转发出的帧被所有下游阶段处理完之后调用；下游阶段出错时同样会调用。
    fn after_forward(&mut self, _frame: &Frame) {}

    /// ### English
    /// Releases GL resources owned by the stage.
    ///
    /// ### 中文
    /// 释放该阶段持有的 GL 资源。
    fn release(&mut self, _gl: &mut dyn GlContext) {}

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// ### English
/// Shared pipeline handle: the chain can be edited from any thread, while frames are dispatched
/// and stages released on the GL thread.
///
/// Stage callbacks run while the chain is locked; they must not edit the chain through this
/// handle.
///
/// ### 中文
/// 共享的管线句柄：任意线程都可以编辑链，而帧的分发与阶段的释放都在 GL 线程上进行。
///
/// 阶段回调在链被锁定期间执行；回调内不得通过本句柄编辑链。
#[derive(Clone)]
pub struct GlPipeline {
    chain: Arc<Mutex<PipelineChain>>,
    handle: GlThreadHandle,
}

impl GlPipeline {
    pub fn new(handle: GlThreadHandle) -> Self {
        Self {
            chain: Arc::new(Mutex::new(PipelineChain::new())),
            handle,
        }
    }

    pub fn handle(&self) -> &GlThreadHandle {
        &self.handle
    }

    fn lock(&self) -> MutexGuard<'_, PipelineChain> {
        self.chain.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// ### English
    /// Runs `f` with the chain locked.
    ///
    /// ### 中文
    /// 在链被锁定的情况下执行 `f`。
    pub fn with_chain<R>(&self, f: impl FnOnce(&mut PipelineChain) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn add(&self, stage: impl Stage) -> StageId {
        self.lock().add(Box::new(stage))
    }

    pub fn append(&self, from: StageId, node: StageId) -> Result<()> {
        self.lock().append(from, node)
    }

    pub fn insert(&self, after: StageId, node: StageId) -> Result<()> {
        self.lock().insert(after, node)
    }

    /// ### English
    /// Unlinks a stage and releases its GL resources on the GL thread.
    ///
    /// ### 中文
    /// 将阶段移出链，并在 GL 线程上释放其 GL 资源。
    pub fn remove(&self, id: StageId) -> Result<()> {
        let Some(mut stage) = self.lock().remove(id) else {
            return Err(PipelineError::UnknownStage(id));
        };
        self.handle.post(move |gl| stage.release(gl))
    }

    pub fn find_first(&self, from: StageId) -> Option<StageId> {
        self.lock().find_first(from)
    }

    pub fn find_last(&self, from: StageId) -> Option<StageId> {
        self.lock().find_last(from)
    }

    pub fn find(&self, from: StageId, kind: StageKind) -> Option<StageId> {
        self.lock().find(from, kind)
    }

    pub fn set_enabled(&self, id: StageId, enabled: bool) -> Result<()> {
        self.lock().set_enabled(id, enabled)
    }

    /// ### English
    /// Posts a dispatch of `frame` through `from` and its downstream stages onto the GL thread.
    /// Frames are processed in post order.
    ///
    /// #### Parameters
    /// - `from`: First stage to receive the frame.
    /// - `frame`: The frame.
    ///
    /// ### 中文
    /// 向 GL 线程投递一次分发：让 `frame` 依次经过 `from` 及其下游阶段。
    /// 帧按投递顺序处理。
    ///
    /// #### 参数
    /// - `from`：首个接收该帧的阶段。
    /// - `frame`：帧。
    pub fn post_frame(&self, from: StageId, frame: Frame) -> Result<()> {
        let chain = self.chain.clone();
        self.handle.post(move |gl| {
            let mut chain = chain.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(err) = chain.on_frame_available(from, gl, &frame) {
                warn!(%err, "frame dispatch failed");
            }
        })
    }

    /// ### English
    /// Releases every stage's GL resources on the GL thread. The chain layout is kept.
    ///
    /// ### 中文
    /// 在 GL 线程上释放所有阶段的 GL 资源；链结构保持不变。
    pub fn release(&self) -> Result<()> {
        let chain = self.chain.clone();
        self.handle.post(move |gl| {
            chain
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .release_all(gl);
            debug!("pipeline released");
        })
    }

    pub(crate) fn shared_chain(&self) -> Arc<Mutex<PipelineChain>> {
        self.chain.clone()
    }
}
