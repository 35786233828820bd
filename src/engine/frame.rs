//! ### English
//! Transient frame descriptor passed between pipeline stages on the GL thread.
//!
//! ### 中文
//! 在 GL 线程上于各 pipeline 阶段之间传递的临时帧描述。

use std::time::Duration;

use dpi::PhysicalSize;

use crate::engine::matrix::{IDENTITY, Mat4};

/// ### English
/// One video frame as seen by the pipeline: a GL texture plus its texture transform.
///
/// The texture is owned by the GL thread; a `Frame` is only a descriptor and must not be
/// handed to another thread.
///
/// ### 中文
/// pipeline 视角下的一帧：一个 GL 纹理及其纹理变换矩阵。
///
/// 纹理归 GL 线程所有；`Frame` 只是描述符，不得交给其他线程。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frame {
    /// ### English
    /// GL texture name.
    ///
    /// ### 中文
    /// GL 纹理名。
    pub texture_id: u32,
    /// ### English
    /// Whether the producing context is GLES 3.x.
    ///
    /// ### 中文
    /// 生产该帧的上下文是否为 GLES 3.x。
    pub is_gles3: bool,
    /// ### English
    /// Whether the texture is an external (OES) texture.
    ///
    /// ### 中文
    /// 纹理是否为外部（OES）纹理。
    pub is_oes: bool,
    /// ### English
    /// Frame size in pixels.
    ///
    /// ### 中文
    /// 帧尺寸（像素）。
    pub size: PhysicalSize<u32>,
    /// ### English
    /// Column-major 4×4 texture transform.
    ///
    /// ### 中文
    /// 列主序 4×4 纹理变换矩阵。
    pub tex_matrix: Mat4,
    /// ### English
    /// Producer presentation time.
    ///
    /// ### 中文
    /// 生产者给出的显示时间戳。
    pub timestamp: Duration,
}

impl Frame {
    /// ### English
    /// Creates a 2D (non-OES) frame with an identity texture transform.
    ///
    /// ### 中文
    /// 创建一个 2D（非 OES）帧，纹理变换为单位矩阵。
    pub fn new(texture_id: u32, size: PhysicalSize<u32>) -> Self {
        Self {
            texture_id,
            is_gles3: false,
            is_oes: false,
            size,
            tex_matrix: IDENTITY,
            timestamp: Duration::ZERO,
        }
    }

    pub fn with_timestamp(mut self, timestamp: Duration) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn width(&self) -> u32 {
        self.size.width
    }

    pub fn height(&self) -> u32 {
        self.size.height
    }
}
