//! ### English
//! Media effect stage: renders the incoming frame through the selected color effect and mirror
//! mode into an offscreen target, and forwards that target's texture.
//!
//! Configuration is written from any thread through [`EffectControl`] and snapshotted on the GL
//! thread once per frame.
//!
//! ### 中文
//! 媒体效果阶段：把输入帧按选定的颜色效果与镜像模式渲染到离屏目标，并转发该目标的纹理。
//!
//! 配置可在任意线程通过 [`EffectControl`] 写入，GL 线程每帧获取一次快照。

use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dpi::PhysicalSize;
use tracing::{debug, warn};

use crate::engine::error::{GlError, PipelineError, Result};
use crate::engine::frame::Frame;
use crate::engine::gl::{
    DrawPass, GlContext, RenderTarget, TargetRequest, TargetScope, Viewport,
};
use crate::engine::matrix::{self, IDENTITY, Mat4};

use super::{Flow, Stage, StageKind};

/// ### English
/// Effect parameters as uploaded to the shader (`uParams`); unused slots are zero.
///
/// ### 中文
/// 上传给着色器（`uParams`）的效果参数；未使用的分量为 0。
pub type EffectParams = [f32; 4];

const EFFECT_COUNT: usize = 7;

/// ### English
/// Color effects. The integer ids are the public, stable encoding.
///
/// ### 中文
/// 颜色效果。整数 id 为对外稳定的编码。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Effect {
    #[default]
    None = 0,
    Grayscale = 1,
    Sepia = 2,
    Negative = 3,
    /// ### English
    /// One parameter: offset added to each channel (`0.0` = unchanged).
    ///
    /// ### 中文
    /// 一个参数：加到每个通道上的偏移（`0.0` 表示不变）。
    Brightness = 4,
    /// ### English
    /// One parameter: contrast factor around mid gray (`1.0` = unchanged).
    ///
    /// ### 中文
    /// 一个参数：围绕中灰的对比度系数（`1.0` 表示不变）。
    Contrast = 5,
    /// ### English
    /// One parameter: number of levels per channel.
    ///
    /// ### 中文
    /// 一个参数：每个通道的色阶数。
    Posterize = 6,
}

impl Effect {
    pub const ALL: [Effect; EFFECT_COUNT] = [
        Effect::None,
        Effect::Grayscale,
        Effect::Sepia,
        Effect::Negative,
        Effect::Brightness,
        Effect::Contrast,
        Effect::Posterize,
    ];

    pub fn id(self) -> i32 {
        self as i32
    }

    /// ### English
    /// Number of floats accepted by [`EffectControl::set_params`].
    ///
    /// ### 中文
    /// [`EffectControl::set_params`] 接受的浮点参数个数。
    pub fn param_count(self) -> usize {
        match self {
            Effect::Brightness | Effect::Contrast | Effect::Posterize => 1,
            _ => 0,
        }
    }

    pub fn default_params(self) -> EffectParams {
        match self {
            Effect::Contrast => [1.0, 0.0, 0.0, 0.0],
            Effect::Posterize => [8.0, 0.0, 0.0, 0.0],
            _ => [0.0; 4],
        }
    }
}

impl TryFrom<i32> for Effect {
    type Error = PipelineError;

    fn try_from(id: i32) -> Result<Self> {
        Effect::ALL
            .into_iter()
            .find(|effect| effect.id() == id)
            .ok_or(PipelineError::InvalidEffect(id))
    }
}

/// ### English
/// Mirror applied to the output through the MVP matrix.
///
/// ### 中文
/// 通过 MVP 矩阵作用于输出的镜像模式。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum MirrorMode {
    #[default]
    None = 0,
    Horizontal = 1,
    Vertical = 2,
    Both = 3,
}

impl MirrorMode {
    pub fn mvp(self) -> Mat4 {
        match self {
            MirrorMode::None => IDENTITY,
            MirrorMode::Horizontal => matrix::scale(-1.0, 1.0),
            MirrorMode::Vertical => matrix::scale(1.0, -1.0),
            MirrorMode::Both => matrix::scale(-1.0, -1.0),
        }
    }
}

impl TryFrom<i32> for MirrorMode {
    type Error = PipelineError;

    fn try_from(id: i32) -> Result<Self> {
        match id {
            0 => Ok(MirrorMode::None),
            1 => Ok(MirrorMode::Horizontal),
            2 => Ok(MirrorMode::Vertical),
            3 => Ok(MirrorMode::Both),
            _ => Err(PipelineError::InvalidMirror(id)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct EffectState {
    effect: Effect,
    mirror: MirrorMode,
    /// ### English
    /// Parameters per effect, indexed by effect id; switching effects keeps each one's values.
    ///
    /// ### 中文
    /// 按效果 id 索引的各效果参数；切换效果时各自的参数值保持不变。
    params: [EffectParams; EFFECT_COUNT],
    enabled: bool,
}

impl Default for EffectState {
    fn default() -> Self {
        Self {
            effect: Effect::None,
            mirror: MirrorMode::None,
            params: Effect::ALL.map(Effect::default_params),
            enabled: true,
        }
    }
}

/// ### English
/// What the GL thread reads from [`EffectControl`] at the start of a frame.
///
/// ### 中文
/// GL 线程在每帧开始时从 [`EffectControl`] 读取的内容。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EffectSnapshot {
    pub effect: Effect,
    pub params: EffectParams,
    pub mirror: MirrorMode,
    pub enabled: bool,
}

/// ### English
/// Thread-safe configuration of a [`MediaEffectStage`]. Setters return immediately; invalid
/// input is rejected before any state changes.
///
/// ### 中文
/// [`MediaEffectStage`] 的线程安全配置。setter 立即返回；非法输入在修改任何状态之前被拒绝。
#[derive(Clone, Default)]
pub struct EffectControl {
    state: Arc<Mutex<EffectState>>,
}

impl EffectControl {
    fn lock(&self) -> MutexGuard<'_, EffectState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// ### English
    /// Selects the effect by id.
    ///
    /// #### Parameters
    /// - `id`: Effect id (see [`Effect`]).
    ///
    /// ### 中文
    /// 按 id 选择效果。
    ///
    /// #### 参数
    /// - `id`：效果 id（见 [`Effect`]）。
    pub fn set_effect(&self, id: i32) -> Result<()> {
        let effect = Effect::try_from(id)?;
        self.lock().effect = effect;
        Ok(())
    }

    /// ### English
    /// Sets the parameters of one effect (it does not have to be the selected one).
    ///
    /// #### Parameters
    /// - `id`: Effect id.
    /// - `params`: Exactly [`Effect::param_count`] values.
    ///
    /// ### 中文
    /// 设置某个效果的参数（不要求是当前选中的效果）。
    ///
    /// #### 参数
    /// - `id`：效果 id。
    /// - `params`：恰好 [`Effect::param_count`] 个值。
    pub fn set_params(&self, id: i32, params: &[f32]) -> Result<()> {
        let effect = Effect::try_from(id)?;
        let expected = effect.param_count();
        if params.len() != expected {
            return Err(PipelineError::InvalidParams {
                effect: id,
                expected,
                actual: params.len(),
            });
        }
        let mut state = self.lock();
        let slot = &mut state.params[effect.id() as usize];
        slot[..expected].copy_from_slice(params);
        Ok(())
    }

    pub fn set_mirror(&self, id: i32) -> Result<()> {
        let mirror = MirrorMode::try_from(id)?;
        self.lock().mirror = mirror;
        Ok(())
    }

    /// ### English
    /// A disabled effect stage forwards frames untouched.
    ///
    /// ### 中文
    /// 被禁用的效果阶段原样转发帧。
    pub fn set_enabled(&self, enabled: bool) {
        self.lock().enabled = enabled;
    }

    pub fn effect(&self) -> Effect {
        self.lock().effect
    }

    pub fn mirror(&self) -> MirrorMode {
        self.lock().mirror
    }

    pub fn params(&self, effect: Effect) -> EffectParams {
        self.lock().params[effect.id() as usize]
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    pub fn snapshot(&self) -> EffectSnapshot {
        let state = self.lock();
        EffectSnapshot {
            effect: state.effect,
            params: state.params[state.effect.id() as usize],
            mirror: state.mirror,
            enabled: state.enabled,
        }
    }
}

/// ### English
/// GL-side drawer of a [`MediaEffectStage`]. Lives on the GL thread.
///
/// ### 中文
/// [`MediaEffectStage`] 的 GL 侧绘制器，存活于 GL 线程。
pub trait EffectDrawer: Send {
    fn effect(&self) -> Effect;

    fn params(&self) -> EffectParams;

    fn mirror(&self) -> MirrorMode;

    /// ### English
    /// Reconfigures the drawer; only called when something actually changed.
    ///
    /// ### 中文
    /// 重新配置绘制器；只在确实发生变化时调用。
    fn update(&mut self, effect: Effect, params: EffectParams, mirror: MirrorMode);

    fn draw(&mut self, gl: &mut dyn GlContext, frame: &Frame) -> std::result::Result<(), GlError>;

    fn release(&mut self, _gl: &mut dyn GlContext) {}
}

/// ### English
/// Default drawer: one textured quad through [`GlContext::draw`].
///
/// ### 中文
/// 默认绘制器：通过 [`GlContext::draw`] 绘制一个纹理四边形。
#[derive(Debug, Clone)]
pub struct GlEffectDrawer {
    effect: Effect,
    params: EffectParams,
    mirror: MirrorMode,
    mvp: Mat4,
}

impl Default for GlEffectDrawer {
    fn default() -> Self {
        Self {
            effect: Effect::None,
            params: Effect::None.default_params(),
            mirror: MirrorMode::None,
            mvp: IDENTITY,
        }
    }
}

impl EffectDrawer for GlEffectDrawer {
    fn effect(&self) -> Effect {
        self.effect
    }

    fn params(&self) -> EffectParams {
        self.params
    }

    fn mirror(&self) -> MirrorMode {
        self.mirror
    }

    fn update(&mut self, effect: Effect, params: EffectParams, mirror: MirrorMode) {
        self.effect = effect;
        self.params = params;
        self.mirror = mirror;
        self.mvp = mirror.mvp();
    }

    fn draw(&mut self, gl: &mut dyn GlContext, frame: &Frame) -> std::result::Result<(), GlError> {
        gl.draw(&DrawPass {
            texture_id: frame.texture_id,
            is_oes: frame.is_oes,
            tex_matrix: frame.tex_matrix,
            mvp: self.mvp,
            effect: self.effect,
            params: self.params,
        })
    }
}

/// ### English
/// Pipeline stage applying an effect + mirror to each frame.
///
/// ### 中文
/// 对每一帧应用效果与镜像的管线阶段。
pub struct MediaEffectStage {
    control: EffectControl,
    drawer: Box<dyn EffectDrawer>,
    output: Option<(RenderTarget, PhysicalSize<u32>)>,
}

impl MediaEffectStage {
    pub fn new(control: EffectControl) -> Self {
        Self::with_drawer(control, Box::new(GlEffectDrawer::default()))
    }

    pub fn with_drawer(control: EffectControl, drawer: Box<dyn EffectDrawer>) -> Self {
        Self {
            control,
            drawer,
            output: None,
        }
    }

    pub fn control(&self) -> EffectControl {
        self.control.clone()
    }

    fn output_target(
        &mut self,
        gl: &mut dyn GlContext,
        size: PhysicalSize<u32>,
    ) -> std::result::Result<RenderTarget, GlError> {
        match self.output {
            Some((target, current)) if current == size => Ok(target),
            Some((target, _)) => {
                gl.resize_target(target, size)?;
                self.output = Some((target, size));
                Ok(target)
            }
            None => {
                let target = gl.create_target(TargetRequest::Offscreen { size })?;
                self.output = Some((target, size));
                Ok(target)
            }
        }
    }

    fn sync_drawer(&mut self, snapshot: &EffectSnapshot) {
        if snapshot.effect == self.drawer.effect()
            && snapshot.params == self.drawer.params()
            && snapshot.mirror == self.drawer.mirror()
        {
            return;
        }
        debug!(
            effect = ?snapshot.effect,
            mirror = ?snapshot.mirror,
            params = ?snapshot.params,
            "effect drawer updated"
        );
        self.drawer
            .update(snapshot.effect, snapshot.params, snapshot.mirror);
    }
}

impl Stage for MediaEffectStage {
    fn kind(&self) -> StageKind {
        StageKind::MediaEffect
    }

    fn on_frame(&mut self, gl: &mut dyn GlContext, frame: &Frame) -> Result<Flow> {
        let snapshot = self.control.snapshot();
        if !snapshot.enabled {
            return Ok(Flow::Forward(*frame));
        }
        self.sync_drawer(&snapshot);

        let target = self.output_target(gl, frame.size)?;
        {
            let mut scope = TargetScope::enter(&mut *gl, target)?;
            scope.set_viewport(Viewport::full(frame.width() as i32, frame.height() as i32));
            if let Err(err) = self.drawer.draw(&mut *scope, frame) {
                warn!(%err, "effect draw failed");
                return Err(err.into());
            }
        }

        let texture_id = gl
            .target_texture(target)
            .ok_or(GlError::UnknownTarget(target.0))?;
        Ok(Flow::Forward(Frame {
            texture_id,
            is_oes: false,
            tex_matrix: IDENTITY,
            ..*frame
        }))
    }

    fn release(&mut self, gl: &mut dyn GlContext) {
        if let Some((target, _)) = self.output.take() {
            gl.release_target(target);
        }
        self.drawer.release(gl);
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
    use crate::engine::test_support::{GlCall, OFFSCREEN_TEXTURE_BASE, RecordingGl};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDrawer {
        inner: GlEffectDrawer,
        updates: Arc<AtomicUsize>,
    }

    impl EffectDrawer for CountingDrawer {
        fn effect(&self) -> Effect {
            self.inner.effect()
        }

        fn params(&self) -> EffectParams {
            self.inner.params()
        }

        fn mirror(&self) -> MirrorMode {
            self.inner.mirror()
        }

        fn update(&mut self, effect: Effect, params: EffectParams, mirror: MirrorMode) {
            self.updates.fetch_add(1, Ordering::SeqCst);
            self.inner.update(effect, params, mirror);
        }

        fn draw(
            &mut self,
            gl: &mut dyn GlContext,
            frame: &Frame,
        ) -> std::result::Result<(), GlError> {
            self.inner.draw(gl, frame)
        }
    }

    fn counting_stage() -> (MediaEffectStage, EffectControl, Arc<AtomicUsize>) {
        let control = EffectControl::default();
        let updates = Arc::new(AtomicUsize::new(0));
        let stage = MediaEffectStage::with_drawer(
            control.clone(),
            Box::new(CountingDrawer {
                inner: GlEffectDrawer::default(),
                updates: updates.clone(),
            }),
        );
        (stage, control, updates)
    }

    fn frame() -> Frame {
        Frame::new(9, PhysicalSize::new(16, 8))
    }

    #[test]
    fn effect_ids_round_trip_and_reject_unknown() {
        for effect in Effect::ALL {
            assert_eq!(Effect::try_from(effect.id()).expect("known id"), effect);
        }
        assert!(matches!(
            Effect::try_from(42),
            Err(PipelineError::InvalidEffect(42))
        ));
        assert!(matches!(
            MirrorMode::try_from(-1),
            Err(PipelineError::InvalidMirror(-1))
        ));
    }

    #[test]
    fn invalid_input_leaves_state_untouched() {
        let control = EffectControl::default();
        control.set_effect(Effect::Sepia.id()).expect("sepia");

        let err = control.set_effect(99).expect_err("unknown effect");
        assert!(err.is_invalid_argument());
        let err = control
            .set_params(Effect::Brightness.id(), &[0.1, 0.2])
            .expect_err("wrong arity");
        assert!(matches!(
            err,
            PipelineError::InvalidParams {
                expected: 1,
                actual: 2,
                ..
            }
        ));
        assert!(control.set_mirror(7).is_err());

        assert_eq!(control.effect(), Effect::Sepia);
        assert_eq!(control.mirror(), MirrorMode::None);
        assert_eq!(control.params(Effect::Brightness), [0.0; 4]);
    }

    #[test]
    fn drawer_updated_only_when_configuration_changes() {
        let (mut stage, control, updates) = counting_stage();
        let mut gl = RecordingGl::new();

        stage.on_frame(&mut gl, &frame()).expect("frame");
        assert_eq!(updates.load(Ordering::SeqCst), 0);

        control.set_effect(Effect::Grayscale.id()).expect("effect");
        control.set_mirror(MirrorMode::Horizontal as i32).expect("mirror");
        for _ in 0..3 {
            stage.on_frame(&mut gl, &frame()).expect("frame");
        }
        assert_eq!(updates.load(Ordering::SeqCst), 1);

        control.set_effect(Effect::Grayscale.id()).expect("same effect");
        stage.on_frame(&mut gl, &frame()).expect("frame");
        assert_eq!(updates.load(Ordering::SeqCst), 1);

        control.set_params(Effect::Contrast.id(), &[1.5]).expect("params");
        stage.on_frame(&mut gl, &frame()).expect("frame");
        assert_eq!(updates.load(Ordering::SeqCst), 1, "params of an unselected effect");

        control.set_effect(Effect::Contrast.id()).expect("contrast");
        stage.on_frame(&mut gl, &frame()).expect("frame");
        assert_eq!(updates.load(Ordering::SeqCst), 2);
        let last_draw = gl.log().draws().pop().expect("draw");
        assert_eq!(last_draw.effect, Effect::Contrast);
        assert_eq!(last_draw.params, [1.5, 0.0, 0.0, 0.0]);
        assert_eq!(last_draw.mvp, matrix::scale(-1.0, 1.0));
    }

    #[test]
    fn renders_into_offscreen_target_and_forwards_its_texture() {
        let (mut stage, _control, _) = counting_stage();
        let mut gl = RecordingGl::new();
        let input = Frame {
            is_oes: true,
            tex_matrix: matrix::flip_vertical(),
            ..frame()
        };

        let Flow::Forward(output) = stage.on_frame(&mut gl, &input).expect("frame") else {
            panic!("effect stage must forward");
        };
        assert_eq!(output.texture_id, OFFSCREEN_TEXTURE_BASE + 1);
        assert!(!output.is_oes);
        assert_eq!(output.tex_matrix, IDENTITY);
        assert_eq!(output.size, input.size);

        let calls = gl.calls();
        let target = RenderTarget(1);
        assert_eq!(
            calls.first(),
            Some(&GlCall::CreateTarget(
                target,
                TargetRequest::Offscreen { size: input.size }
            ))
        );
        assert_eq!(calls.last(), Some(&GlCall::Swap(target)));
        let draw = gl.log().draws().pop().expect("draw");
        assert_eq!(draw.texture_id, input.texture_id);
        assert!(draw.is_oes);
        assert_eq!(draw.tex_matrix, matrix::flip_vertical());

        stage
            .on_frame(&mut gl, &Frame::new(9, PhysicalSize::new(32, 32)))
            .expect("resized frame");
        assert!(gl.calls().contains(&GlCall::ResizeTarget(
            target,
            PhysicalSize::new(32, 32)
        )));
    }

    #[test]
    fn disabled_effect_forwards_input() {
        let (mut stage, control, _) = counting_stage();
        control.set_enabled(false);
        let mut gl = RecordingGl::new();
        assert_eq!(
            stage.on_frame(&mut gl, &frame()).expect("frame"),
            Flow::Forward(frame())
        );
        assert!(gl.calls().is_empty());
    }
}
