//! ### English
//! Chain head fed by a producer (camera, decoder) that renders into a GL texture.
//!
//! ### 中文
//! 由生产者（相机、解码器）写入 GL 纹理并驱动的链头阶段。

use std::any::Any;
use std::sync::PoisonError;
use std::time::Duration;

use dpi::PhysicalSize;
use tracing::{debug, trace, warn};

use crate::engine::error::{PipelineError, Result};
use crate::engine::frame::Frame;
use crate::engine::gl::GlContext;
use crate::engine::matrix::{IDENTITY, Mat4};

use super::{Flow, GlPipeline, Stage, StageId, StageKind};

/// ### English
/// Texture the producer renders into.
///
/// ### 中文
/// 生产者写入的纹理。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProducerTexture {
    pub texture_id: u32,
    /// ### English
    /// `true` for an external (OES) texture such as a `SurfaceTexture`.
    ///
    /// ### 中文
    /// 外部（OES）纹理（例如 `SurfaceTexture`）时为 `true`。
    pub is_oes: bool,
    pub size: PhysicalSize<u32>,
}

/// ### English
/// Head stage turning producer notifications into frames.
///
/// ### 中文
/// 把生产者通知转换为帧的链头阶段。
pub struct SurfaceReceiverStage {
    texture: ProducerTexture,
    tex_matrix: Mat4,
}

impl SurfaceReceiverStage {
    pub fn new(texture: ProducerTexture) -> Self {
        Self {
            texture,
            tex_matrix: IDENTITY,
        }
    }

    pub fn texture(&self) -> ProducerTexture {
        self.texture
    }

    /// ### English
    /// Texture transform of the most recent frame.
    ///
    /// ### 中文
    /// 最近一帧的纹理变换矩阵。
    pub fn tex_matrix(&self) -> Mat4 {
        self.tex_matrix
    }

    /// ### English
    /// Builds the frame for the producer's latest image.
    ///
    /// #### Parameters
    /// - `gl`: The GL thread's context.
    /// - `tex_matrix`: Texture transform reported by the producer.
    /// - `timestamp`: Producer presentation time.
    ///
    /// ### 中文
    /// 为生产者最新的一幅图像构建帧。
    ///
    /// #### 参数
    /// - `gl`：GL 线程的上下文。
    /// - `tex_matrix`：生产者给出的纹理变换矩阵。
    /// - `timestamp`：生产者给出的显示时间戳。
    fn latch(&mut self, gl: &dyn GlContext, tex_matrix: Mat4, timestamp: Duration) -> Frame {
        self.tex_matrix = tex_matrix;
        Frame {
            texture_id: self.texture.texture_id,
            is_gles3: gl.is_gles3(),
            is_oes: self.texture.is_oes,
            size: self.texture.size,
            tex_matrix,
            timestamp,
        }
    }
}

impl Stage for SurfaceReceiverStage {
    fn kind(&self) -> StageKind {
        StageKind::SurfaceReceiver
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
/// Producer-side handle of a [`SurfaceReceiverStage`]. Cheap to clone, callable from any
/// thread; frames are dispatched on the GL thread in call order.
///
/// ### 中文
/// [`SurfaceReceiverStage`] 的生产者侧句柄。克隆开销低，可在任意线程调用；
/// 帧按调用顺序在 GL 线程上分发。
#[derive(Clone)]
pub struct FrameProducer {
    pipeline: GlPipeline,
    stage: StageId,
}

impl FrameProducer {
    /// ### English
    /// Attaches to the receiver stage `stage` of `pipeline`.
    ///
    /// ### 中文
    /// 关联到 `pipeline` 中的接收阶段 `stage`。
    pub fn attach(pipeline: &GlPipeline, stage: StageId) -> Result<Self> {
        let is_receiver = pipeline
            .with_chain(|chain| chain.stage::<SurfaceReceiverStage>(stage).is_some());
        if !is_receiver {
            return Err(PipelineError::UnknownStage(stage));
        }
        Ok(Self {
            pipeline: pipeline.clone(),
            stage,
        })
    }

    /// ### English
    /// Signals that the producer rendered a new image.
    ///
    /// #### Parameters
    /// - `tex_matrix`: Texture transform of the new image.
    /// - `timestamp`: Presentation time of the new image.
    ///
    /// ### 中文
    /// 通知生产者已渲染出一幅新图像。
    ///
    /// #### 参数
    /// - `tex_matrix`：新图像的纹理变换矩阵。
    /// - `timestamp`：新图像的显示时间戳。
    pub fn frame_available(&self, tex_matrix: Mat4, timestamp: Duration) -> Result<()> {
        let chain = self.pipeline.shared_chain();
        let stage = self.stage;
        self.pipeline.handle().post(move |gl| {
            let mut chain = chain.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(receiver) = chain.stage_mut::<SurfaceReceiverStage>(stage) else {
                trace!(?stage, "receiver removed, dropping frame");
                return;
            };
            let frame = receiver.latch(gl, tex_matrix, timestamp);
            if let Err(err) = chain.on_frame_available(stage, gl, &frame) {
                warn!(%err, "frame dispatch failed");
            }
        })
    }

    /// ### English
    /// Updates the producer texture size.
    ///
    /// ### 中文
    /// 更新生产者纹理尺寸。
    pub fn resize(&self, width: i32, height: i32) -> Result<()> {
        if width <= 0 || height <= 0 {
            return Err(PipelineError::InvalidSize { width, height });
        }
        let size = PhysicalSize::new(width as u32, height as u32);
        let chain = self.pipeline.shared_chain();
        let stage = self.stage;
        self.pipeline.handle().post(move |_| {
            let mut chain = chain.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(receiver) = chain.stage_mut::<SurfaceReceiverStage>(stage) {
                receiver.texture.size = size;
                debug!(?stage, width, height, "producer resized");
            }
        })
    }
}
