//! End-to-end runs of a full chain and a view on a real GL thread with a software context.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use crossbeam_channel as channel;
use dpi::PhysicalSize;
use gl_pipeline::{
    CallbackExecutor, CaptureControl, DrawPass, EffectControl, FrameProducer, GlContext, GlError,
    GlPipeline, GlRenderer, GlThread, GlThreadConfig, GlView, IDENTITY, MediaEffectStage,
    PresenterStage, ProducerTexture, RenderTarget, StageKind, SurfaceCaptureStage,
    SurfaceReceiverStage, TargetRequest, ViewConfig, Viewport, VsyncCallbackQueue,
};
use image::RgbaImage;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[derive(Clone, Default)]
struct Counters {
    draws: Arc<AtomicUsize>,
    window_swaps: Arc<AtomicUsize>,
    live_targets: Arc<AtomicUsize>,
}

/// Software context: keeps target bookkeeping and fills readbacks with a solid color.
struct SoftGl {
    counters: Counters,
    targets: HashMap<u32, TargetRequest>,
    next: u32,
}

impl SoftGl {
    fn boxed(counters: Counters) -> Box<dyn GlContext> {
        Box::new(Self {
            counters,
            targets: HashMap::new(),
            next: 1,
        })
    }
}

impl GlContext for SoftGl {
    fn is_gles3(&self) -> bool {
        true
    }

    fn create_target(&mut self, request: TargetRequest) -> Result<RenderTarget, GlError> {
        let target = RenderTarget(self.next);
        self.next += 1;
        self.targets.insert(target.0, request);
        self.counters.live_targets.fetch_add(1, Ordering::SeqCst);
        Ok(target)
    }

    fn resize_target(
        &mut self,
        target: RenderTarget,
        _size: PhysicalSize<u32>,
    ) -> Result<(), GlError> {
        self.targets
            .get(&target.0)
            .map(|_| ())
            .ok_or(GlError::UnknownTarget(target.0))
    }

    fn release_target(&mut self, target: RenderTarget) {
        if self.targets.remove(&target.0).is_some() {
            self.counters.live_targets.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn target_texture(&self, target: RenderTarget) -> Option<u32> {
        match self.targets.get(&target.0) {
            Some(TargetRequest::Offscreen { .. }) => Some(500 + target.0),
            _ => None,
        }
    }

    fn make_current(&mut self, target: RenderTarget) -> Result<(), GlError> {
        self.targets
            .get(&target.0)
            .map(|_| ())
            .ok_or(GlError::UnknownTarget(target.0))
    }

    fn swap(&mut self, target: RenderTarget) -> Result<(), GlError> {
        if let Some(TargetRequest::Window { .. }) = self.targets.get(&target.0) {
            self.counters.window_swaps.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn set_viewport(&mut self, _viewport: Viewport) {}

    fn clear(&mut self, _rgba: [f32; 4]) {}

    fn draw(&mut self, _pass: &DrawPass) -> Result<(), GlError> {
        self.counters.draws.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read_pixels(&mut self, width: u32, height: u32) -> Result<Vec<u8>, GlError> {
        Ok([10u8, 20, 30, 255].repeat(width as usize * height as usize))
    }
}

fn spawn(counters: &Counters) -> GlThread {
    init_tracing();
    let counters = counters.clone();
    GlThread::spawn(&GlThreadConfig::default(), move || Ok(SoftGl::boxed(counters)))
        .expect("spawn GL thread")
}

#[test]
fn receiver_effect_capture_presenter_chain() {
    let counters = Counters::default();
    let thread = spawn(&counters);
    let pipeline = GlPipeline::new(thread.handle());

    let size = PhysicalSize::new(4, 2);
    let receiver = pipeline.add(SurfaceReceiverStage::new(ProducerTexture {
        texture_id: 9,
        is_oes: true,
        size,
    }));
    let effects = EffectControl::default();
    effects.set_effect(1).expect("grayscale");
    let effect = pipeline.add(MediaEffectStage::new(effects.clone()));

    let capture = CaptureControl::new(Duration::ZERO);
    let (bitmaps_tx, bitmaps) = channel::unbounded::<RgbaImage>();
    let executor: Arc<dyn CallbackExecutor> = Arc::new(thread.handle());
    let capture_stage = pipeline.add(SurfaceCaptureStage::new(
        capture.clone(),
        Arc::new(move |bitmap: RgbaImage| {
            let _ = bitmaps_tx.send(bitmap);
        }),
        executor,
    ));
    let presenter = pipeline.add(PresenterStage::new(0x1, size));

    pipeline.append(receiver, effect).expect("append effect");
    pipeline.append(receiver, capture_stage).expect("append capture");
    pipeline.append(receiver, presenter).expect("append presenter");
    assert_eq!(pipeline.find_first(presenter), Some(receiver));
    assert_eq!(pipeline.find_last(receiver), Some(presenter));
    assert_eq!(
        pipeline.find(receiver, StageKind::SurfaceCapture),
        Some(capture_stage)
    );

    let producer = FrameProducer::attach(&pipeline, receiver).expect("attach");
    capture.trigger();
    for ms in 0..3 {
        producer
            .frame_available(IDENTITY, Duration::from_millis(ms))
            .expect("frame");
    }
    thread.handle().invoke(|_| ()).expect("barrier");

    let bitmap = bitmaps
        .recv_timeout(Duration::from_secs(2))
        .expect("one capture");
    assert_eq!(bitmap.dimensions(), (4, 2));
    assert_eq!(bitmap.get_pixel(0, 0).0, [10, 20, 30, 255]);
    assert!(bitmaps.try_recv().is_err(), "trigger captures exactly once");
    assert!(!capture.is_capturing());

    // Effect and presenter draw every frame; the capture redraws the one frame it reads back.
    assert_eq!(counters.draws.load(Ordering::SeqCst), 3 + 3 + 1);
    assert_eq!(counters.window_swaps.load(Ordering::SeqCst), 3);

    pipeline.release().expect("release");
    thread.handle().invoke(|_| ()).expect("barrier");
    assert_eq!(counters.live_targets.load(Ordering::SeqCst), 0);
}

struct CountingRenderer {
    frames: Arc<Mutex<Vec<&'static str>>>,
}

impl GlRenderer for CountingRenderer {
    fn on_surface_created(&mut self, _gl: &mut dyn GlContext) {
        self.frames.lock().expect("lock").push("created");
    }

    fn draw_frame(&mut self, _gl: &mut dyn GlContext) -> Result<(), GlError> {
        self.frames.lock().expect("lock").push("frame");
        Ok(())
    }

    fn on_surface_destroyed(&mut self, _gl: &mut dyn GlContext) {
        self.frames.lock().expect("lock").push("destroyed");
    }
}

#[test]
fn view_stops_drawing_once_surface_is_gone() {
    let counters = Counters::default();
    let thread = spawn(&counters);
    let vsync = Arc::new(VsyncCallbackQueue::with_capacity(8));
    let events = Arc::new(Mutex::new(Vec::new()));
    let view = GlView::with_config(
        thread.handle(),
        &ViewConfig::default(),
        CountingRenderer {
            frames: events.clone(),
        },
        vsync.clone(),
    );
    let barrier = || thread.handle().invoke(|_| ()).expect("barrier");

    view.surface_created(0x1, 32, 32).expect("created");
    barrier();
    for _ in 0..2 {
        vsync.tick(Duration::from_millis(16));
        barrier();
    }
    view.surface_destroyed().expect("destroyed");
    barrier();
    for _ in 0..2 {
        vsync.tick(Duration::from_millis(16));
        barrier();
    }

    assert_eq!(
        *events.lock().expect("lock"),
        vec!["created", "frame", "frame", "destroyed"]
    );
    assert_eq!(counters.window_swaps.load(Ordering::SeqCst), 2);
    assert_eq!(counters.live_targets.load(Ordering::SeqCst), 0);
}
