//! ### English
//! Scoped make-current/swap pairing.
//!
//! ### 中文
//! 作用域化的 make-current/swap 配对。

use std::ops::{Deref, DerefMut};

use tracing::warn;

use crate::engine::error::GlError;

use super::{GlContext, RenderTarget};

/// ### English
/// Makes a target current on entry and swaps it when dropped, on every exit path including
/// early `?` returns and unwinding, so the next stage never sees a stale current target.
///
/// ### 中文
/// 进入时使目标成为 current，drop 时执行 swap；覆盖所有退出路径（包括 `?` 提前返回与
/// unwind），保证下一个阶段不会看到过期的 current 目标。
pub struct TargetScope<'a> {
    gl: &'a mut (dyn GlContext + 'a),
    target: RenderTarget,
}

impl<'a> TargetScope<'a> {
    pub fn enter(gl: &'a mut (dyn GlContext + 'a), target: RenderTarget) -> Result<Self, GlError> {
        gl.make_current(target)?;
        Ok(Self { gl, target })
    }

    pub fn target(&self) -> RenderTarget {
        self.target
    }
}

impl<'a> Deref for TargetScope<'a> {
    type Target = dyn GlContext + 'a;

    fn deref(&self) -> &Self::Target {
        &*self.gl
    }
}

impl<'a> DerefMut for TargetScope<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.gl
    }
}

impl Drop for TargetScope<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.gl.swap(self.target) {
            warn!(render_target = self.target.0, %err, "swap failed while leaving target scope");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::gl::TargetRequest;
    use crate::engine::test_support::{GlCall, RecordingGl};
    use dpi::PhysicalSize;

    fn failing_draw(scope: &mut TargetScope<'_>) -> Result<(), GlError> {
        scope.clear([0.0; 4]);
        Err(GlError::Readback("boom".to_string()))
    }

    #[test]
    fn swaps_on_error_path() {
        let mut gl = RecordingGl::new();
        let target = gl
            .create_target(TargetRequest::Offscreen {
                size: PhysicalSize::new(4, 4),
            })
            .expect("target");

        {
            let mut scope = TargetScope::enter(&mut gl, target).expect("enter");
            assert!(failing_draw(&mut scope).is_err());
        }

        let calls = gl.calls();
        assert_eq!(calls.last(), Some(&GlCall::Swap(target)));
    }

    #[test]
    fn swaps_on_unwind() {
        let mut gl = RecordingGl::new();
        let target = gl
            .create_target(TargetRequest::Offscreen {
                size: PhysicalSize::new(4, 4),
            })
            .expect("target");
        let log = gl.log();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _scope = TargetScope::enter(&mut gl, target).expect("enter");
            panic!("draw exploded");
        }));
        assert!(result.is_err());
        assert_eq!(log.last(), Some(GlCall::Swap(target)));
    }
}
