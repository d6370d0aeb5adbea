//! Window management using winit

use std::sync::Arc;
use std::time::Instant;

use glam::Vec2;
use thiserror::Error;
use winit::{
    dpi::PhysicalSize,
    event::{DeviceEvent, ElementState, Event, MouseButton, MouseScrollDelta, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window as WinitWindow, WindowBuilder},
};

use crate::engine::is_frame_recoverable;
use crate::error::{RenderError, RenderResult};
use crate::scene::CameraInput;

#[derive(Error, Debug)]
pub enum WindowError {
    #[error("Event loop error: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),
    #[error("Failed to create window: {0}")]
    Os(#[from] winit::error::OsError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

/// Wrapper around winit window with input state
pub struct Window {
    window: Arc<WinitWindow>,
    width: u32,
    height: u32,
    resized: bool,
    close_requested: bool,
    input: CameraInput,
}

impl Window {
    /// Create a new window with the given title and dimensions
    pub fn new(
        event_loop: &EventLoop<()>,
        title: &str,
        width: u32,
        height: u32,
    ) -> Result<Self, WindowError> {
        let window = Arc::new(
            WindowBuilder::new()
                .with_title(title)
                .with_inner_size(PhysicalSize::new(width, height))
                .build(event_loop)?,
        );

        Ok(Self {
            window,
            width,
            height,
            resized: false,
            close_requested: false,
            input: CameraInput::new(),
        })
    }

    /// Get the raw window for backend initialization
    pub fn window(&self) -> &WinitWindow {
        &self.window
    }

    /// Get arc reference to window
    pub fn window_arc(&self) -> Arc<WinitWindow> {
        Arc::clone(&self.window)
    }

    /// Get current window dimensions
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn should_close(&self) -> bool {
        self.close_requested
    }

    /// Camera input gathered since the last frame
    pub fn input(&self) -> &CameraInput {
        &self.input
    }

    pub fn set_title(&self, title: &str) {
        self.window.set_title(title);
    }

    fn set_key(&mut self, key: KeyCode, pressed: bool) {
        let input = &mut self.input;
        match key {
            KeyCode::KeyW | KeyCode::ArrowUp => input.forward = pressed,
            KeyCode::KeyS | KeyCode::ArrowDown => input.backward = pressed,
            KeyCode::KeyA | KeyCode::ArrowLeft => input.left = pressed,
            KeyCode::KeyD | KeyCode::ArrowRight => input.right = pressed,
            KeyCode::KeyE | KeyCode::Space => input.up = pressed,
            KeyCode::KeyQ => input.down = pressed,
            KeyCode::ShiftLeft | KeyCode::ShiftRight => input.sprint = pressed,
            _ => {}
        }
    }

    /// Handle window events
    pub fn handle_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::Resized(size) => {
                self.width = size.width;
                self.height = size.height;
                self.resized = true;
            }
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(key) = event.physical_key {
                    self.set_key(key, event.state == ElementState::Pressed);
                }
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Right,
                ..
            } => {
                self.input.mouse_look_active = *state == ElementState::Pressed;
            }
            WindowEvent::MouseWheel { delta, .. } => {
                self.input.scroll_delta += match delta {
                    MouseScrollDelta::LineDelta(_, y) => *y,
                    MouseScrollDelta::PixelDelta(position) => position.y as f32 / 40.0,
                };
            }
            _ => {}
        }
    }

    fn handle_device_event(&mut self, event: &DeviceEvent) {
        if let DeviceEvent::MouseMotion { delta } = event {
            self.input.mouse_delta += Vec2::new(delta.0 as f32, delta.1 as f32);
        }
    }
}

/// What [`run`] drives once the window exists
pub trait WindowApp {
    fn resized(&mut self, width: u32, height: u32) -> RenderResult<()>;

    /// Update and draw one frame
    fn frame(&mut self, window: &Window, dt: f32) -> RenderResult<()>;
}

/// Open a window, build the app for it and run frames until it closes. A
/// frame error that only loses the frame is logged; any other ends the loop.
pub fn run<A, F>(title: &str, width: u32, height: u32, create: F) -> Result<(), WindowError>
where
    A: WindowApp + 'static,
    F: FnOnce(&Window) -> RenderResult<A>,
{
    let event_loop = EventLoop::new()?;
    let mut window = Window::new(&event_loop, title, width, height)?;
    let mut app = create(&window)?;
    let mut last_frame = Instant::now();
    let mut failure: Option<RenderError> = None;

    event_loop.run(|event, elwt: &EventLoopWindowTarget<()>| {
        elwt.set_control_flow(ControlFlow::Poll);

        match event {
            Event::WindowEvent { event, .. } => {
                window.handle_event(&event);

                match event {
                    WindowEvent::CloseRequested => elwt.exit(),
                    WindowEvent::RedrawRequested => {
                        if window.resized {
                            window.resized = false;
                            let (width, height) = window.dimensions();
                            if let Err(e) = app.resized(width, height) {
                                log::error!("Resize failed: {}", e);
                                failure = Some(e);
                                elwt.exit();
                                return;
                            }
                        }

                        let now = Instant::now();
                        let dt = now.duration_since(last_frame).as_secs_f32();
                        last_frame = now;

                        match app.frame(&window, dt) {
                            Ok(()) => {}
                            Err(e) if is_frame_recoverable(&e) => {
                                log::warn!("Frame dropped: {}", e);
                                let (width, height) = window.dimensions();
                                if let Err(e) = app.resized(width, height) {
                                    log::error!("Surface recovery failed: {}", e);
                                }
                            }
                            Err(e) => {
                                log::error!("Frame failed: {}", e);
                                failure = Some(e);
                                elwt.exit();
                            }
                        }
                        window.input.reset_deltas();
                    }
                    _ => {}
                }
            }
            Event::DeviceEvent { event, .. } => window.handle_device_event(&event),
            Event::AboutToWait => window.window.request_redraw(),
            _ => {}
        }
    })?;

    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
