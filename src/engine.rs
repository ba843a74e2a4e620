//! Main engine orchestrator
//!
//! Binds a winit window to a [`FrameScheduler`] running on the wgpu backend and drives
//! it from the event loop.

use crate::backend::wgpu_backend::WgpuBackend;
use crate::config::RendererConfig;
use crate::error::{RendererError, RendererResult};
use crate::resources::Model;
use crate::scene::Scene;
use crate::scheduler::{FrameOutcome, FrameScheduler, Overlay};
use crate::window::Window;
use winit::{
    event::{Event, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget},
};

/// Windowed renderer
pub struct Engine {
    window: Window,
    scheduler: FrameScheduler<WgpuBackend>,
}

impl Engine {
    /// Create the wgpu device for `window` and every pipeline resource
    pub fn new(window: Window, config: RendererConfig) -> RendererResult<Self> {
        let backend = WgpuBackend::new(window.window_arc(), &config)?;
        let scheduler = FrameScheduler::new(backend, config)?;
        Ok(Self { window, scheduler })
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn scheduler(&self) -> &FrameScheduler<WgpuBackend> {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut FrameScheduler<WgpuBackend> {
        &mut self.scheduler
    }

    pub fn scene(&self) -> &Scene {
        self.scheduler.scene()
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        self.scheduler.scene_mut()
    }

    pub fn load_models(&mut self, models: &[Model]) -> RendererResult<()> {
        self.scheduler.load_models(models)
    }

    /// Forward a window event; resizes are applied on the next frame
    pub fn handle_event(&mut self, event: &WindowEvent) {
        self.window.handle_event(event);
        if self.window.was_resized() {
            let (width, height) = self.window.dimensions();
            self.scheduler.resize(width, height);
            self.window.clear_resize_flag();
        }
    }

    /// Advance animations and render one frame
    pub fn render(&mut self, overlay: Option<&mut dyn Overlay<WgpuBackend>>) -> RendererResult<FrameOutcome> {
        self.scheduler.advance_animations();
        self.scheduler.render_frame(overlay)
    }
}

/// Open a window and run the renderer until it is closed.
///
/// `setup` runs once after initialization, typically to load models and populate the
/// scene. `update` runs before every frame.
pub fn run<S, U>(title: &str, config: RendererConfig, setup: S, mut update: U) -> RendererResult<()>
where
    S: FnOnce(&mut Engine) -> RendererResult<()>,
    U: FnMut(&mut Engine),
{
    let event_loop = EventLoop::new().map_err(|e| RendererError::Window(e.to_string()))?;
    let window = Window::new(&event_loop, title, 1280, 720)?;
    let mut engine = Engine::new(window, config)?;
    setup(&mut engine)?;

    let mut failure = None;
    event_loop
        .run(|event, elwt: &EventLoopWindowTarget<()>| {
            elwt.set_control_flow(ControlFlow::Poll);

            match event {
                Event::WindowEvent { event, .. } => {
                    engine.handle_event(&event);
                    match event {
                        WindowEvent::CloseRequested => elwt.exit(),
                        WindowEvent::RedrawRequested => {
                            update(&mut engine);
                            if let Err(e) = engine.render(None) {
                                log::error!("Frame failed: {}", e);
                                failure = Some(e);
                                elwt.exit();
                            }
                        }
                        _ => {}
                    }
                }
                Event::AboutToWait => engine.window().request_redraw(),
                _ => {}
            }
        })
        .map_err(|e| RendererError::Window(e.to_string()))?;

    engine.scheduler_mut().shutdown()?;
    failure.map_or(Ok(()), Err)
}
