//! Recording [`GlContext`] for unit tests: every call is appended to a shared log so tests can
//! assert on GL-side effects without a GPU.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use dpi::PhysicalSize;

use crate::engine::error::GlError;
use crate::engine::gl::{DrawPass, GlContext, RenderTarget, TargetRequest, Viewport};

/// Texture names handed out for offscreen targets start here.
pub const OFFSCREEN_TEXTURE_BASE: u32 = 1000;

#[derive(Clone, Debug, PartialEq)]
pub enum GlCall {
    CreateTarget(RenderTarget, TargetRequest),
    ResizeTarget(RenderTarget, PhysicalSize<u32>),
    ReleaseTarget(RenderTarget),
    MakeCurrent(RenderTarget),
    Swap(RenderTarget),
    Viewport(Viewport),
    Clear([f32; 4]),
    Draw(DrawPass),
    ReadPixels(u32, u32),
}

/// Shared view of a [`RecordingGl`] call log; stays valid after the context moved to a thread.
#[derive(Clone, Default)]
pub struct GlLog(Arc<Mutex<Vec<GlCall>>>);

impl GlLog {
    fn push(&self, call: GlCall) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    pub fn calls(&self) -> Vec<GlCall> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last(&self) -> Option<GlCall> {
        self.calls().last().cloned()
    }

    pub fn draws(&self) -> Vec<DrawPass> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                GlCall::Draw(pass) => Some(pass),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&GlCall) -> bool) -> usize {
        self.calls().iter().filter(|call| pred(call)).count()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

pub struct RecordingGl {
    log: GlLog,
    gles3: bool,
    targets: HashMap<u32, TargetRequest>,
    next_target: u32,
    fail_readback: bool,
    /// Bytes dropped from the end of every readback.
    short_readback: usize,
    /// Runs inside every `read_pixels`, before the pixels are returned.
    on_readback: Option<Box<dyn FnMut() + Send>>,
}

impl RecordingGl {
    pub fn new() -> Self {
        Self {
            log: GlLog::default(),
            gles3: true,
            targets: HashMap::new(),
            next_target: 1,
            fail_readback: false,
            short_readback: 0,
            on_readback: None,
        }
    }

    pub fn with_log(log: GlLog) -> Self {
        Self {
            log,
            ..Self::new()
        }
    }

    pub fn failing_readback(mut self) -> Self {
        self.fail_readback = true;
        self
    }

    pub fn short_readback(mut self, missing_bytes: usize) -> Self {
        self.short_readback = missing_bytes;
        self
    }

    pub fn on_readback(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.on_readback = Some(Box::new(hook));
        self
    }

    pub fn log(&self) -> GlLog {
        self.log.clone()
    }

    pub fn calls(&self) -> Vec<GlCall> {
        self.log.calls()
    }
}

impl GlContext for RecordingGl {
    fn is_gles3(&self) -> bool {
        self.gles3
    }

    fn create_target(&mut self, request: TargetRequest) -> Result<RenderTarget, GlError> {
        let target = RenderTarget(self.next_target);
        self.next_target += 1;
        self.targets.insert(target.0, request);
        self.log.push(GlCall::CreateTarget(target, request));
        Ok(target)
    }

    fn resize_target(
        &mut self,
        target: RenderTarget,
        size: PhysicalSize<u32>,
    ) -> Result<(), GlError> {
        if !self.targets.contains_key(&target.0) {
            return Err(GlError::UnknownTarget(target.0));
        }
        self.log.push(GlCall::ResizeTarget(target, size));
        Ok(())
    }

    fn release_target(&mut self, target: RenderTarget) {
        if self.targets.remove(&target.0).is_some() {
            self.log.push(GlCall::ReleaseTarget(target));
        }
    }

    fn target_texture(&self, target: RenderTarget) -> Option<u32> {
        match self.targets.get(&target.0) {
            Some(TargetRequest::Offscreen { .. }) => Some(OFFSCREEN_TEXTURE_BASE + target.0),
            _ => None,
        }
    }

    fn make_current(&mut self, target: RenderTarget) -> Result<(), GlError> {
        if !self.targets.contains_key(&target.0) {
            return Err(GlError::UnknownTarget(target.0));
        }
        self.log.push(GlCall::MakeCurrent(target));
        Ok(())
    }

    fn swap(&mut self, target: RenderTarget) -> Result<(), GlError> {
        self.log.push(GlCall::Swap(target));
        Ok(())
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.log.push(GlCall::Viewport(viewport));
    }

    fn clear(&mut self, rgba: [f32; 4]) {
        self.log.push(GlCall::Clear(rgba));
    }

    fn draw(&mut self, pass: &DrawPass) -> Result<(), GlError> {
        self.log.push(GlCall::Draw(*pass));
        Ok(())
    }

    /// Pixel `(x, y)` reads back as `[x, y, 0, 255]` (rows bottom-up, like GL).
    fn read_pixels(&mut self, width: u32, height: u32) -> Result<Vec<u8>, GlError> {
        self.log.push(GlCall::ReadPixels(width, height));
        if let Some(hook) = self.on_readback.as_mut() {
            hook();
        }
        if self.fail_readback {
            return Err(GlError::Readback("injected failure".to_string()));
        }
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
        for y in 0..height {
            for x in 0..width {
                pixels.extend_from_slice(&[x as u8, y as u8, 0, 255]);
            }
        }
        pixels.truncate(pixels.len().saturating_sub(self.short_readback));
        Ok(pixels)
    }
}
