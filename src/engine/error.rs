//! ### English
//! Error types shared by the GL thread, the pipeline chain and its stages.
//!
//! ### 中文
//! GL 线程、pipeline 链及其各阶段共用的错误类型。

use thiserror::Error;

use crate::engine::pipeline::StageId;

/// ### English
/// Failures reported by a [`GlContext`](crate::engine::gl::GlContext) implementation.
///
/// ### 中文
/// 由 [`GlContext`](crate::engine::gl::GlContext) 实现上报的失败。
#[derive(Debug, Error)]
pub enum GlError {
    #[error("failed to create GL context: {0}")]
    Context(String),
    #[error("shader build failed: {0}")]
    Shader(String),
    #[error("unknown render target {0}")]
    UnknownTarget(u32),
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    #[error("framebuffer incomplete (status 0x{0:x})")]
    IncompleteFramebuffer(u32),
    #[error("surface operation failed: {0}")]
    Surface(String),
    #[error("pixel readback failed: {0}")]
    Readback(String),
}

/// ### English
/// Errors returned by pipeline, view and GL-thread operations.
///
/// The invalid-argument class (see [`Self::is_invalid_argument`]) is always reported before any
/// state is mutated.
///
/// ### 中文
/// pipeline、view 与 GL 线程操作返回的错误。
///
/// 非法参数类错误（见 [`Self::is_invalid_argument`]）总是在修改任何状态之前返回。
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unsupported effect id {0}")]
    InvalidEffect(i32),
    #[error("unsupported mirror mode {0}")]
    InvalidMirror(i32),
    #[error("effect {effect} takes {expected} parameter(s), got {actual}")]
    InvalidParams {
        effect: i32,
        expected: usize,
        actual: usize,
    },
    #[error("invalid capture count {0} (expected -1, 0 or a positive count)")]
    InvalidCaptureCount(i32),
    #[error("invalid size {width}x{height}")]
    InvalidSize { width: i32, height: i32 },
    #[error("unknown pipeline stage {0:?}")]
    UnknownStage(StageId),
    #[error("pipeline stage {0:?} is already linked into a chain")]
    AlreadyLinked(StageId),
    #[error("pipeline stage {0:?} cannot be linked to itself")]
    SelfLink(StageId),
    #[error("GL thread is not running")]
    ThreadStopped,
    #[error("timed out initializing GL thread")]
    InitTimeout,
    #[error("synchronous call onto the GL thread from the GL thread itself")]
    WouldDeadlock,
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Gl(#[from] GlError),
}

impl PipelineError {
    /// ### English
    /// Returns `true` for errors caused by an invalid caller-supplied argument.
    ///
    /// ### 中文
    /// 对由调用方传入非法参数导致的错误返回 `true`。
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            Self::InvalidEffect(_)
                | Self::InvalidMirror(_)
                | Self::InvalidParams { .. }
                | Self::InvalidCaptureCount(_)
                | Self::InvalidSize { .. }
        )
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
