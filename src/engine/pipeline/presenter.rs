//! ### English
//! Terminal stage drawing frames onto a window surface.
//!
//! ### 中文
//! 把帧绘制到窗口 surface 上的末端阶段。

use std::any::Any;

use dpi::PhysicalSize;
use tracing::debug;

use crate::engine::error::Result;
use crate::engine::frame::Frame;
use crate::engine::gl::{
    DrawPass, GlContext, RenderTarget, TargetRequest, TargetScope, Viewport,
};
use crate::engine::matrix::IDENTITY;

use super::{Effect, Flow, Stage, StageKind};

/// ### English
/// Draws each frame full-viewport onto a window target and presents it. The window surface is
/// created on the first frame.
///
/// ### 中文
/// 把每一帧铺满视口绘制到窗口目标并呈现。窗口 surface 在首帧时创建。
pub struct PresenterStage {
    native_window: usize,
    size: PhysicalSize<u32>,
    target: Option<RenderTarget>,
    clear_color: [f32; 4],
}

impl PresenterStage {
    /// ### English
    /// Creates a presenter for a platform window.
    ///
    /// #### Parameters
    /// - `native_window`: Platform window pointer as an address.
    /// - `size`: Window size in pixels.
    ///
    /// ### 中文
    /// 为平台窗口创建呈现阶段。
    ///
    /// #### 参数
    /// - `native_window`：平台窗口指针的地址值。
    /// - `size`：窗口尺寸（像素）。
    pub fn new(native_window: usize, size: PhysicalSize<u32>) -> Self {
        Self {
            native_window,
            size,
            target: None,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }

    pub fn with_clear_color(mut self, rgba: [f32; 4]) -> Self {
        self.clear_color = rgba;
        self
    }

    /// ### English
    /// Must be called on the GL thread (e.g. through the pipeline's chain lock in a posted task).
    ///
    /// ### 中文
    /// 必须在 GL 线程上调用（例如在投递的任务中通过管线的链锁调用）。
    pub fn resize(&mut self, gl: &mut dyn GlContext, size: PhysicalSize<u32>) -> Result<()> {
        self.size = size;
        if let Some(target) = self.target {
            gl.resize_target(target, size)?;
        }
        Ok(())
    }

    fn window(&mut self, gl: &mut dyn GlContext) -> Result<RenderTarget> {
        if let Some(target) = self.target {
            return Ok(target);
        }
        let target = gl.create_target(TargetRequest::Window {
            native_window: self.native_window,
            size: self.size,
        })?;
        debug!(render_target = target.0, "presenter window created");
        self.target = Some(target);
        Ok(target)
    }
}

impl Stage for PresenterStage {
    fn kind(&self) -> StageKind {
        StageKind::Presenter
    }

    fn on_frame(&mut self, gl: &mut dyn GlContext, frame: &Frame) -> Result<Flow> {
        let target = self.window(gl)?;
        let mut scope = TargetScope::enter(gl, target)?;
        scope.set_viewport(Viewport::full(
            self.size.width as i32,
            self.size.height as i32,
        ));
        scope.clear(self.clear_color);
        scope.draw(&DrawPass {
            texture_id: frame.texture_id,
            is_oes: frame.is_oes,
            tex_matrix: frame.tex_matrix,
            mvp: IDENTITY,
            effect: Effect::None,
            params: [0.0; 4],
        })?;
        Ok(Flow::Consumed)
    }

    fn release(&mut self, gl: &mut dyn GlContext) {
        if let Some(target) = self.target.take() {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::{GlCall, RecordingGl};

    #[test]
    fn presents_once_per_frame_and_consumes() {
        let mut gl = RecordingGl::new();
        let size = PhysicalSize::new(10, 20);
        let mut stage = PresenterStage::new(0xdead, size);

        for _ in 0..2 {
            let flow = stage
                .on_frame(&mut gl, &Frame::new(5, size))
                .expect("frame");
            assert_eq!(flow, Flow::Consumed);
        }

        let log = gl.log();
        let window = RenderTarget(1);
        assert_eq!(
            log.count(|call| matches!(call, GlCall::CreateTarget(_, TargetRequest::Window { .. }))),
            1
        );
        assert_eq!(log.count(|call| *call == GlCall::Swap(window)), 2);
        assert_eq!(log.draws().len(), 2);

        stage.release(&mut gl);
        assert_eq!(log.last(), Some(GlCall::ReleaseTarget(window)));
    }
}
