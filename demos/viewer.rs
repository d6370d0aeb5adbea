//! Model viewer
//!
//! Run with:
//!   cargo run --example viewer
//!   cargo run --example viewer -- --model assets/sponza.obj --rotate
//!
//! Controls:
//!   WASD     - Move camera
//!   QE       - Move up/down
//!   Shift    - Sprint
//!   Mouse    - Look around (hold right mouse button)
//!   Scroll   - Zoom (orbit mode)

use std::collections::VecDeque;
use std::path::PathBuf;

use arena_renderer::{
    resources::MeshData,
    scene::{CameraController, FreeFlyController, GameObject, OrbitController},
    window::{self, Window, WindowApp},
    Engine, EngineConfig, RenderResult, WgpuBackend,
};
use clap::Parser;
use glam::Vec3;

#[derive(Parser, Debug)]
#[command(about = "Offscreen-composited model viewer")]
struct Args {
    /// OBJ model to show instead of the built-in cubes
    #[arg(long)]
    model: Option<PathBuf>,

    /// WGSL program with vs_mesh/fs_mesh entry points, reloaded on change
    #[arg(long)]
    shader: Option<PathBuf>,

    #[arg(long, default_value_t = 1280)]
    width: u32,

    #[arg(long, default_value_t = 720)]
    height: u32,

    #[arg(long)]
    no_vsync: bool,

    /// Orbit the scene instead of flying
    #[arg(long)]
    rotate: bool,
}

struct Viewer {
    engine: Engine<WgpuBackend>,
    controller: Box<dyn CameraController>,
    title: String,
    frame_times: VecDeque<f32>,
    title_timer: f32,
}

impl Viewer {
    fn update_fps(&mut self, window: &Window, dt: f32) {
        if self.frame_times.len() >= 60 {
            self.frame_times.pop_front();
        }
        self.frame_times.push_back(dt);

        self.title_timer += dt;
        if self.title_timer < 0.5 {
            return;
        }
        self.title_timer = 0.0;

        let avg_dt = self.frame_times.iter().sum::<f32>() / self.frame_times.len() as f32;
        if avg_dt > 0.0 {
            window.set_title(&format!(
                "{} - {:.0} FPS [{}]",
                self.title,
                1.0 / avg_dt,
                self.controller.name()
            ));
        }
    }
}

impl WindowApp for Viewer {
    fn resized(&mut self, width: u32, height: u32) -> RenderResult<()> {
        self.engine.resize(width, height)
    }

    fn frame(&mut self, window: &Window, dt: f32) -> RenderResult<()> {
        self.engine
            .update_camera(self.controller.as_mut(), window.input(), dt);
        self.engine.pack_frame()?;
        self.engine.render_frame()?;
        self.update_fps(window, dt);
        Ok(())
    }
}

fn build_scene(engine: &mut Engine<WgpuBackend>, args: &Args) -> RenderResult<()> {
    let program = match &args.shader {
        Some(path) => engine.load_program(path, "mesh")?,
        None => engine.scene_program(),
    };

    let context = engine.context_mut();
    context.camera.position = Vec3::new(0.0, 3.0, 8.0);
    context.camera.look_at(Vec3::ZERO);
    context.add_directional_light(Vec3::new(-0.4, -1.0, -0.3), Vec3::splat(0.8));
    context.add_point_light(Vec3::new(2.0, 2.0, 2.0), Vec3::new(1.0, 0.6, 0.3));

    if let Some(path) = &args.model {
        let model = engine.load_model(path)?;
        engine
            .context_mut()
            .add_object(GameObject::new("model", model, program));
        return Ok(());
    }

    let (assets, backend) = engine.assets_and_backend();
    let mesh = assets.add_mesh(backend, "cube", &[MeshData::cube()])?;
    let model = assets.add_mesh_model("cube", mesh);

    let context = engine.context_mut();
    for x in -2..=2 {
        for z in -2..=2 {
            let position = Vec3::new(x as f32 * 1.5, 0.0, z as f32 * 1.5);
            context.add_object(
                GameObject::new(format!("cube {x},{z}"), model, program).with_position(position),
            );
        }
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let config = EngineConfig {
        width: args.width,
        height: args.height,
        vsync: !args.no_vsync,
        hot_reload: args.shader.is_some(),
        ..Default::default()
    };
    let title = config.title.clone();

    let result = window::run(&title, config.width, config.height, |window| {
        let backend = WgpuBackend::new(window.window_arc(), config.vsync)?;
        let mut engine = Engine::init(backend, config.clone())?;
        build_scene(&mut engine, &args)?;

        let camera = &engine.context().camera;
        let controller: Box<dyn CameraController> = if args.rotate {
            Box::new(OrbitController::from_camera(camera).with_auto_rotate(true))
        } else {
            Box::new(FreeFlyController::from_camera(camera))
        };

        Ok(Viewer {
            engine,
            controller,
            title: title.clone(),
            frame_times: VecDeque::with_capacity(60),
            title_timer: 0.0,
        })
    });

    if let Err(e) = result {
        log::error!("Viewer exited with an error: {}", e);
        std::process::exit(1);
    }
}
