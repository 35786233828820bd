//! ### English
//! Pass-through stages.
//!
//! ### 中文
//! 直通阶段。

use std::any::Any;

use crate::engine::error::Result;
use crate::engine::frame::Frame;
use crate::engine::gl::GlContext;

use super::{Flow, Stage, StageKind};

/// ### English
/// Forwards every frame unchanged. Useful as a fixed chain head or splice point.
///
/// ### 中文
/// 原样转发每一帧；可作为固定的链头或拼接点。
#[derive(Debug, Default)]
pub struct ProxyStage;

impl ProxyStage {
    pub fn new() -> Self {
        Self
    }
}

impl Stage for ProxyStage {
    fn kind(&self) -> StageKind {
        StageKind::Proxy
    }

    fn on_frame(&mut self, _gl: &mut dyn GlContext, frame: &Frame) -> Result<Flow> {
        Ok(Flow::Forward(*frame))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// ### English
/// Forwards every frame unchanged, then calls the observer once the downstream stages have
/// handled it. The observer runs on the GL thread and must not block.
///
/// ### 中文
/// 原样转发每一帧，并在下游阶段处理完之后调用观察者。观察者在 GL 线程上运行，不得阻塞。
pub struct OnFrameStage {
    observer: Box<dyn FnMut(&Frame) + Send + 'static>,
}

impl OnFrameStage {
    pub fn new(observer: impl FnMut(&Frame) + Send + 'static) -> Self {
        Self {
            observer: Box::new(observer),
        }
    }
}

impl Stage for OnFrameStage {
    fn kind(&self) -> StageKind {
        StageKind::OnFrame
    }

    fn on_frame(&mut self, _gl: &mut dyn GlContext, frame: &Frame) -> Result<Flow> {
        Ok(Flow::Forward(*frame))
    }

    fn after_forward(&mut self, frame: &Frame) {
        (self.observer)(frame);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
