use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use winit::dpi::PhysicalSize;
use winit::event::{Event, KeyEvent, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::window::{Window, WindowBuilder, WindowLevel};

use tracing::{error, info, warn};

use crate::error::FrameError;
use crate::gpu::WgpuBackend;
use crate::input::{control_for_key, InputAction};
use crate::orchestrator::FrameOrchestrator;
use crate::runtime::SystemTimeSource;
use crate::types::{SandboxSettings, Viewport};
use crate::watch::{ChangeNotifier, RebuildSignal};

/// Window plus everything that renders into it. Field order matters: the
/// orchestrator owns the surface and must drop before the window.
struct SandboxWindow {
    orchestrator: FrameOrchestrator<WgpuBackend>,
    window: Arc<Window>,
}

impl SandboxWindow {
    fn handle_key(&mut self, event: &KeyEvent) -> Option<InputAction> {
        if event.repeat {
            return None;
        }
        let control = control_for_key(&event.logical_key)?;
        self.orchestrator.handle_control(control, event.state)
    }

    fn viewport(&self) -> Viewport {
        let size = self.window.inner_size();
        Viewport::new(size.width, size.height)
    }

    /// Returns `false` once the loop should stop.
    fn redraw(&mut self) -> bool {
        match self.orchestrator.frame() {
            Ok(()) => true,
            Err(FrameError::Surface(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated)) => {
                let viewport = self.viewport();
                self.orchestrator.set_viewport(viewport);
                self.orchestrator.backend_mut().recover_surface();
                true
            }
            Err(FrameError::Surface(wgpu::SurfaceError::OutOfMemory)) => {
                error!("surface out of memory; closing sandbox");
                false
            }
            Err(FrameError::Surface(wgpu::SurfaceError::Timeout)) => {
                warn!("surface timeout; retrying next frame");
                true
            }
            Err(FrameError::Surface(other)) => {
                warn!("surface error: {other}");
                true
            }
            Err(FrameError::Terminated) => false,
        }
    }
}

pub(crate) fn run_window(settings: SandboxSettings) -> Result<()> {
    let event_loop =
        EventLoop::new().map_err(|err| anyhow!("failed to create event loop: {err}"))?;

    let (width, height) = settings.window_size;
    let mut builder = WindowBuilder::new()
        .with_title(settings.window_title.as_str())
        .with_inner_size(PhysicalSize::new(width, height));
    if settings.floating {
        builder = builder.with_window_level(WindowLevel::AlwaysOnTop);
    }
    let window = builder
        .build(&event_loop)
        .map_err(|err| anyhow!("failed to create sandbox window: {err}"))?;
    let window = Arc::new(window);

    let size = window.inner_size();
    let viewport = Viewport::new(size.width.max(1), size.height.max(1));
    let backend =
        WgpuBackend::new(window.as_ref(), viewport).context("failed to initialise GPU")?;

    let signal = RebuildSignal::new();
    let mut orchestrator = FrameOrchestrator::new(
        backend,
        &settings,
        viewport,
        signal.clone(),
        Box::new(SystemTimeSource::new()),
    )
    .context("failed to allocate volume buffers")?;

    match ChangeNotifier::watch(&settings.shader_dir, signal) {
        Ok(notifier) => {
            info!(dir = %notifier.dir().display(), "watching shaders for changes");
            orchestrator.attach_notifier(notifier);
        }
        Err(err) => warn!(
            dir = %settings.shader_dir.display(),
            "hot reload disabled, press R to rebuild manually: {err}"
        ),
    }

    let mut state = SandboxWindow {
        orchestrator,
        window,
    };
    state.window.request_redraw();

    event_loop
        .run(move |event, elwt| match event {
            Event::WindowEvent { window_id, event } if window_id == state.window.id() => {
                match event {
                    WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                        state.orchestrator.terminate();
                        elwt.exit();
                    }
                    WindowEvent::KeyboardInput { event, .. } => {
                        if state.handle_key(&event) == Some(InputAction::Quit) {
                            state.orchestrator.terminate();
                            elwt.exit();
                        }
                    }
                    WindowEvent::Resized(size) => {
                        state
                            .orchestrator
                            .set_viewport(Viewport::new(size.width, size.height));
                    }
                    WindowEvent::RedrawRequested => {
                        if !state.redraw() {
                            state.orchestrator.terminate();
                            elwt.exit();
                        }
                    }
                    _ => {}
                }
            }
            Event::AboutToWait => {
                state.orchestrator.poll_signal();
                state.window.request_redraw();
                elwt.set_control_flow(ControlFlow::Wait);
            }
            Event::LoopExiting => state.orchestrator.terminate(),
            _ => {}
        })
        .map_err(|err| anyhow!("event loop terminated with error: {err}"))
}
