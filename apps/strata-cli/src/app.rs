//! The frame loop: world render into offscreen targets, then the UI
//! compositor draws the world output as a textured quad onto the surface
//! image of the same slot.

use std::sync::Arc;

use serde::Serialize;
use strata_assets::{ResourceStore, StoreConfig};
use strata_common::{Extent2D, ResourceId};
use strata_ecs::World;
use strata_gfx::{GpuDevice, SemaphoreData};
use strata_render::gui::{Gradient, quad};
use strata_render::{
    DrawBackend, EngineContext, FrameCounter, RenderSettings, SurfaceImage, SurfaceRenderer,
    SurfaceStats, WorldFrameStats, WorldRenderer,
};

use crate::scene::{self, SURFACE_FORMAT};

/// World outputs are registered as textures from this id upwards, one per
/// frame in flight.
const VIEWPORT_BASE: u64 = 1000;
const STATUS_BAR_HEIGHT: f32 = 32.0;
const MARGIN: f32 = 16.0;

pub fn viewport_id(frame: usize) -> ResourceId {
    ResourceId(VIEWPORT_BASE + frame as u64)
}

#[derive(Debug, Clone, Copy)]
pub struct FrameReport {
    pub frame: usize,
    pub world_rendered: bool,
    pub world: WorldFrameStats,
    pub surface: SurfaceStats,
    pub signal: SemaphoreData,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScopeReport {
    pub name: String,
    pub samples: usize,
    pub average_us: u128,
    pub max_us: u128,
}

/// Totals over a run, printed by `strata-cli run`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub backend: String,
    pub frames: u64,
    pub frames_in_flight: usize,
    pub world_frames: u64,
    pub objects: u64,
    pub world_draws: u64,
    pub world_skipped: u64,
    pub world_pipeline_binds: u64,
    pub gui_draws: u64,
    pub gui_invalid: u64,
    pub gui_clipped: u64,
    pub gui_buffers_grown: u64,
    pub resizes: u32,
    pub hazards: usize,
    pub scopes: Vec<ScopeReport>,
}

impl RunReport {
    pub fn record(&mut self, frame: &FrameReport) {
        self.frames += 1;
        if frame.world_rendered {
            self.world_frames += 1;
            self.objects += frame.world.objects as u64;
            self.world_draws += frame.world.draws as u64;
            self.world_skipped += frame.world.skipped as u64;
            self.world_pipeline_binds += frame.world.pipeline_binds as u64;
        }
        self.gui_draws += frame.surface.draws as u64;
        self.gui_invalid += frame.surface.invalid as u64;
        self.gui_clipped += frame.surface.clipped as u64;
        self.gui_buffers_grown += frame.surface.grown as u64;
    }
}

pub struct App {
    context: Arc<EngineContext>,
    resources: ResourceStore,
    world_renderer: WorldRenderer,
    surface: SurfaceRenderer,
    images: Vec<SurfaceImage>,
    scene: World,
    counter: FrameCounter,
    resizes: u32,
}

impl App {
    pub fn new(
        device: &mut dyn GpuDevice,
        settings: &RenderSettings,
        size: Extent2D,
        cubes: usize,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(!size.is_zero_area(), "initial size must be non-zero, got {size:?}");
        let context = Arc::new(EngineContext::new());
        let mut resources = ResourceStore::new(device, StoreConfig::default())?;
        scene::register_shaders(device, &mut resources, settings)?;
        scene::register_content(device, &mut resources)?;
        resources.upload_pending(device)?;

        let world_renderer = WorldRenderer::new(
            device,
            &resources,
            settings.world.clone(),
            Arc::clone(&context),
            size,
        )?;
        for frame in 0..world_renderer.frames_in_flight() {
            if let Some(output) = world_renderer.output_texture(frame) {
                resources.register_external_texture(
                    viewport_id(frame),
                    format!("viewport-{frame}"),
                    output,
                    size,
                )?;
            }
        }

        let surface = SurfaceRenderer::new(
            device,
            &resources,
            settings.surface.clone(),
            Arc::clone(&context),
        )?;
        let images = (0..surface.frames_in_flight())
            .map(|i| SurfaceImage::create(device, format!("surface-{i}"), size, SURFACE_FORMAT))
            .collect::<Result<Vec<_>, _>>()?;
        let counter = FrameCounter::new(world_renderer.frames_in_flight());
        tracing::info!(
            width = size.width,
            height = size.height,
            frames_in_flight = counter.frames_in_flight(),
            backend = device.name(),
            "app initialised"
        );
        Ok(Self {
            context,
            resources,
            world_renderer,
            surface,
            images,
            scene: scene::build_world(cubes),
            counter,
            resizes: 0,
        })
    }

    pub fn resources(&self) -> &ResourceStore {
        &self.resources
    }

    pub fn surface(&self) -> &SurfaceRenderer {
        &self.surface
    }

    pub fn world_renderer(&self) -> &WorldRenderer {
        &self.world_renderer
    }

    pub fn frames_in_flight(&self) -> usize {
        self.counter.frames_in_flight()
    }

    fn canvas(&self) -> Extent2D {
        self.images
            .first()
            .map(SurfaceImage::extent)
            .unwrap_or_default()
    }

    /// Logic side of a tick: advance the scene and record this tick's UI.
    fn tick(&mut self, frame: usize, delta: f32) {
        self.scene.step(delta);
        self.world_renderer.fetch_renderables(&self.scene);
        self.world_renderer.pre_tick();
        self.world_renderer.tick(delta);

        let canvas = self.canvas();
        let (w, h) = (canvas.width as f32, canvas.height as f32);
        let mut gui = self.surface.gui(&self.resources);
        gui.draw_gradient(
            &quad(0.0, 0.0, w, h, [1.0; 4]),
            Gradient {
                start_color: [0.08, 0.09, 0.11, 1.0],
                end_color: [0.16, 0.17, 0.2, 1.0],
                start: [0.0, 0.0],
                end: [0.0, h],
            },
        );
        gui.draw_textured(
            &quad(
                MARGIN,
                MARGIN,
                (w - 2.0 * MARGIN).max(0.0),
                (h - 2.0 * MARGIN - STATUS_BAR_HEIGHT).max(0.0),
                [1.0; 4],
            ),
            viewport_id(frame),
            [1.0; 4],
        );
        gui.draw_default(
            &quad(0.0, h - STATUS_BAR_HEIGHT, w, STATUS_BAR_HEIGHT, [1.0; 4]),
            [0.05, 0.05, 0.06, 0.9],
        );
        let recorded = gui.flush_gui([w, h]);
        self.surface.tick(recorded);
    }

    /// Resize the world targets and surface images, then point the viewport
    /// textures at the new world outputs. A zero-area size pauses the world
    /// and keeps the previous surface images.
    pub fn resize(&mut self, device: &mut dyn GpuDevice, size: Extent2D) -> anyhow::Result<()> {
        self.world_renderer.resize(device, size)?;
        self.resizes += 1;
        if size.is_zero_area() {
            return Ok(());
        }
        for frame in 0..self.world_renderer.frames_in_flight() {
            let Some(output) = self.world_renderer.output_texture(frame) else {
                continue;
            };
            let id = viewport_id(frame);
            if self.resources.texture(id).is_some() {
                self.resources.reload_external_texture(id, output, size)?;
            } else {
                self.resources
                    .register_external_texture(id, format!("viewport-{frame}"), output, size)?;
            }
        }
        device.wait_idle()?;
        for (i, image) in self.images.iter_mut().enumerate() {
            let fresh = SurfaceImage::create(device, format!("surface-{i}"), size, SURFACE_FORMAT)?;
            std::mem::replace(image, fresh).destroy(device);
        }
        Ok(())
    }

    /// One frame. A `resize` arriving after the UI was recorded is applied
    /// before rendering; the compositor re-resolves the viewport texture.
    pub fn frame(
        &mut self,
        device: &mut dyn GpuDevice,
        delta: f32,
        resize: Option<Extent2D>,
    ) -> anyhow::Result<FrameReport> {
        let frame = self.counter.current();
        let context = Arc::clone(&self.context);
        let _scope = context.profiler.scope("frame");

        self.tick(frame, delta);
        if let Some(size) = resize {
            self.resize(device, size)?;
        }

        self.resources.upload_pending(device)?;
        let upload = self.resources.upload_semaphore();
        let world_signal = self
            .world_renderer
            .render(device, &self.resources, frame, upload)?;
        let world_rendered = world_signal.semaphore == self.world_renderer.frame_signal_semaphore(frame);

        self.surface.sync_render();
        self.surface
            .render(device, frame, &self.resources, &mut self.images[frame])?;
        let signal = self.surface.submit(device, frame, &[world_signal])?;

        self.counter.advance();
        let report = FrameReport {
            frame,
            world_rendered,
            world: self.world_renderer.last_stats(),
            surface: self.surface.last_stats(),
            signal,
        };
        tracing::trace!(?report, "frame done");
        Ok(report)
    }

    pub fn finish_report(&self, report: &mut RunReport) {
        report.frames_in_flight = self.frames_in_flight();
        report.resizes = self.resizes;
        report.scopes = self
            .context
            .profiler
            .stats()
            .into_iter()
            .map(|s| ScopeReport {
                name: s.name,
                samples: s.samples,
                average_us: s.average.as_micros(),
                max_us: s.max.as_micros(),
            })
            .collect();
    }

    /// Release everything in dependency order: renderers, images, store.
    pub fn shutdown(self, device: &mut dyn GpuDevice) -> anyhow::Result<()> {
        device.wait_idle()?;
        self.surface.destroy(device)?;
        self.world_renderer.destroy(device)?;
        for image in self.images {
            image.destroy(device);
        }
        self.resources.destroy(device)?;
        tracing::info!("app shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_gfx::{CompletionMode, HeadlessDevice, QueueKind, ResourceState};

    fn settings(frames_in_flight: usize) -> RenderSettings {
        let mut settings = RenderSettings::default();
        settings.set_frames_in_flight(frames_in_flight);
        settings
    }

    fn viewport_index_in_materials(device: &HeadlessDevice, app: &App, frame: usize) -> u32 {
        // The textured request is the second one: after the 64-byte gradient.
        let bytes = device
            .read_buffer(app.surface().material_buffer(frame).handle())
            .unwrap();
        u32::from_le_bytes(bytes[64 + 8..64 + 12].try_into().unwrap())
    }

    #[test]
    fn frames_composite_the_world_output() {
        let mut device = HeadlessDevice::new();
        let mut app = App::new(&mut device, &settings(2), Extent2D::new(64, 48), 3).unwrap();
        for _ in 0..4 {
            let report = app.frame(&mut device, 1.0 / 60.0, None).unwrap();
            assert!(report.world_rendered);
            assert_eq!(report.world.objects, 4);
            assert_eq!(report.surface.draws, 3);
            assert_eq!(report.surface.invalid, 0);
        }
        let graphics = device
            .submissions()
            .iter()
            .filter(|s| s.queue == QueueKind::Graphics)
            .count();
        // world + surface per frame
        assert_eq!(graphics, 8);
        assert!(device.hazards().is_empty());
        app.shutdown(&mut device).unwrap();
        assert_eq!(device.live_object_count(), 0);
    }

    #[test]
    fn surface_waits_on_the_world_render() {
        let mut device = HeadlessDevice::with_mode(CompletionMode::Manual);
        let mut app = App::new(&mut device, &settings(2), Extent2D::new(32, 32), 1).unwrap();
        app.frame(&mut device, 0.016, None).unwrap();
        let world_signal = app.world_renderer().frame_signal_semaphore(0);
        let last = device.submissions().last().unwrap();
        assert_eq!(last.queue, QueueKind::Graphics);
        assert!(last.waits.iter().any(|w| w.semaphore == world_signal && w.value == 1));
        device.complete_all();
        app.shutdown(&mut device).unwrap();
        assert!(device.hazards().is_empty());
    }

    #[test]
    fn resize_after_recording_patches_the_viewport() {
        let mut device = HeadlessDevice::with_mode(CompletionMode::Manual);
        let mut app = App::new(&mut device, &settings(2), Extent2D::new(64, 64), 2).unwrap();
        app.frame(&mut device, 0.016, None).unwrap();
        device.advance(1);
        let before = app.resources().texture(viewport_id(1)).unwrap().bindless_index;

        let report = app
            .frame(&mut device, 0.016, Some(Extent2D::new(96, 80)))
            .unwrap();
        device.complete_all();
        let after = app.resources().texture(viewport_id(1)).unwrap().bindless_index;
        assert_ne!(before, after);
        assert_eq!(report.frame, 1);
        assert_eq!(report.surface.invalid, 0);
        assert_eq!(report.surface.draws, 3);
        assert_eq!(viewport_index_in_materials(&device, &app, 1), after);
        assert_eq!(
            app.resources().texture(viewport_id(1)).unwrap().handle(),
            app.world_renderer().output_texture(1).unwrap()
        );
        assert!(device.hazards().is_empty());
        app.shutdown(&mut device).unwrap();
        assert_eq!(device.live_object_count(), 0);
    }

    #[test]
    fn zero_area_pauses_the_world_but_not_the_ui() {
        let mut device = HeadlessDevice::new();
        let mut app = App::new(&mut device, &settings(2), Extent2D::new(32, 32), 1).unwrap();
        let report = app
            .frame(&mut device, 0.016, Some(Extent2D::new(0, 0)))
            .unwrap();
        assert!(!report.world_rendered);
        assert_eq!(report.surface.draws, 3);
        let report = app
            .frame(&mut device, 0.016, Some(Extent2D::new(40, 40)))
            .unwrap();
        assert!(report.world_rendered);
        assert_eq!(report.surface.invalid, 0);
        app.shutdown(&mut device).unwrap();
        assert_eq!(device.live_object_count(), 0);
    }

    #[test]
    fn surface_images_end_presentable() {
        let mut device = HeadlessDevice::new();
        let mut app = App::new(&mut device, &settings(1), Extent2D::new(16, 16), 1).unwrap();
        let mut report = RunReport::default();
        for _ in 0..3 {
            let frame = app.frame(&mut device, 0.016, None).unwrap();
            report.record(&frame);
            assert_eq!(frame.frame, 0);
        }
        assert!(app.images.iter().all(|i| i.state() == ResourceState::Present));
        app.finish_report(&mut report);
        assert_eq!(report.frames, 3);
        assert_eq!(report.world_frames, 3);
        assert_eq!(report.gui_draws, 9);
        assert!(report.scopes.iter().any(|s| s.name == "frame" && s.samples == 3));
        app.shutdown(&mut device).unwrap();
    }
}
