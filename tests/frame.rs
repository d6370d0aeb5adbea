//! Whole-frame behavior through the engine on the recording backend.

use arena_renderer::backend::dummy::{DummyBackend, RecordedCommand};
use arena_renderer::render::shaders::SCENE_SHADER;
use arena_renderer::resources::{MeshData, ModelId};
use arena_renderer::scene::GameObject;
use arena_renderer::uniforms::UniformRange;
use arena_renderer::{Engine, EngineConfig, RenderError};
use glam::Vec3;
use rstest::rstest;

fn engine(config: EngineConfig) -> Engine<DummyBackend> {
    Engine::init(DummyBackend::new(64, 48), config).unwrap()
}

/// A model whose two cube submeshes share one geometry buffer.
fn two_part_model(engine: &mut Engine<DummyBackend>) -> ModelId {
    let (assets, backend) = engine.assets_and_backend();
    let mesh = assets
        .add_mesh(backend, "pair", &[MeshData::cube(), MeshData::cube()])
        .unwrap();
    assets.add_mesh_model("pair", mesh)
}

fn add_objects(engine: &mut Engine<DummyBackend>, model: ModelId, count: usize) {
    let program = engine.scene_program();
    for i in 0..count {
        engine.context_mut().add_object(
            GameObject::new(format!("object {}", i), model, program)
                .with_position(Vec3::new(i as f32, 0.0, 0.0)),
        );
    }
}

#[test]
fn test_draws_follow_object_then_submesh_order() {
    let mut engine = engine(EngineConfig::default());
    let model = two_part_model(&mut engine);
    add_objects(&mut engine, model, 3);
    engine.backend_mut().take_commands();

    let stats = engine.render_frame().unwrap();

    assert_eq!(stats.draw_calls, 7);
    assert_eq!(stats.skipped_submeshes, 0);
    assert_eq!(
        engine.backend().draws(),
        vec![0..36, 36..72, 0..36, 36..72, 0..36, 36..72, 0..6]
    );
    assert_eq!(engine.backend().frames_presented(), 1);
}

#[test]
fn test_vertex_arrays_are_created_once() {
    let mut engine = engine(EngineConfig::default());
    let model = two_part_model(&mut engine);
    add_objects(&mut engine, model, 3);

    let first = engine.render_frame().unwrap();
    // Two scene submeshes plus the composite quad
    assert_eq!(first.vaos_created, 3);
    assert_eq!(engine.vao_cache().len(), 3);

    let second = engine.render_frame().unwrap();
    assert_eq!(second.vaos_created, 0);
    assert_eq!(engine.backend().counters().vertex_arrays_created, 3);
}

#[test]
fn test_object_bindings_come_after_program() {
    let mut engine = engine(EngineConfig::default());
    let model = two_part_model(&mut engine);
    add_objects(&mut engine, model, 2);

    let packed = engine.pack_frame().unwrap();
    engine.backend_mut().take_commands();
    engine.render_frame().unwrap();

    let buffer = engine.arena().buffer();
    let ranges: Vec<UniformRange> = engine
        .context()
        .objects
        .iter()
        .map(|o| o.uniform_range.unwrap())
        .collect();
    let bound: Vec<(u32, u64, u64)> = engine
        .backend()
        .commands()
        .iter()
        .filter_map(|c| match c {
            RecordedCommand::BindUniformRange {
                slot,
                buffer: b,
                offset,
                size,
            } if *b == buffer => Some((*slot, *offset, *size)),
            _ => None,
        })
        .collect();

    assert_eq!(
        bound,
        vec![
            (0, packed.global.offset, packed.global.size),
            (1, ranges[0].offset, ranges[0].size),
            (0, packed.global.offset, packed.global.size),
            (1, ranges[1].offset, ranges[1].size),
        ]
    );

    let commands = engine.backend().commands();
    let first_bind = commands
        .iter()
        .position(|c| matches!(c, RecordedCommand::BindUniformRange { .. }))
        .unwrap();
    assert!(matches!(commands[first_bind - 1], RecordedCommand::SetProgram(_)));
}

#[test]
fn test_mismatched_submesh_is_skipped() {
    let mut engine = engine(EngineConfig::default());
    let cubes = two_part_model(&mut engine);
    let flat = {
        let (assets, backend) = engine.assets_and_backend();
        // No normals, which the scene program reads
        let mesh = assets.add_mesh(backend, "flat", &[MeshData::quad()]).unwrap();
        assets.add_mesh_model("flat", mesh)
    };
    let program = engine.scene_program();
    engine
        .context_mut()
        .add_object(GameObject::new("flat", flat, program));
    engine
        .context_mut()
        .add_object(GameObject::new("cubes", cubes, program));

    let stats = engine.render_frame().unwrap();

    assert_eq!(stats.skipped_submeshes, 1);
    assert_eq!(engine.backend().draws(), vec![0..36, 36..72, 0..6]);
}

#[test]
fn test_arena_ranges_through_engine() {
    let mut engine = engine(EngineConfig::default());
    let model = two_part_model(&mut engine);
    add_objects(&mut engine, model, 2);
    engine
        .context_mut()
        .add_point_light(Vec3::Y, Vec3::ONE);

    let packed = engine.pack_frame().unwrap();

    assert_eq!(packed.global, UniformRange { offset: 0, size: 80 });
    let objects = &engine.context().objects;
    assert_eq!(objects[0].uniform_range, Some(UniformRange { offset: 256, size: 128 }));
    assert_eq!(objects[1].uniform_range, Some(UniformRange { offset: 512, size: 128 }));
    assert_eq!(packed.bytes, 640);
}

#[test]
fn test_arena_overflow_fails_the_frame() {
    let mut engine = engine(EngineConfig {
        uniform_arena_size: Some(512),
        ..Default::default()
    });
    assert_eq!(engine.arena().capacity(), 512);
    let model = two_part_model(&mut engine);
    add_objects(&mut engine, model, 2);

    let result = engine.pack_frame();
    assert!(matches!(result, Err(RenderError::ArenaOverflow { .. })));

    let objects = &engine.context().objects;
    assert!(objects[0].uniform_range.is_some());
    assert!(objects[1].uniform_range.is_none());

    assert!(engine.render_frame().is_err());
    assert_eq!(engine.backend().frames_presented(), 0);
}

#[rstest]
#[case(Some(1 << 20), 65536)]
#[case(Some(4096), 4096)]
#[case(None, 65536)]
fn test_arena_capacity_is_capped(#[case] requested: Option<usize>, #[case] expected: usize) {
    let engine = engine(EngineConfig {
        uniform_arena_size: requested,
        ..Default::default()
    });
    assert_eq!(engine.arena().capacity(), expected);
}

#[test]
fn test_resize_releases_old_attachments() {
    let mut engine = engine(EngineConfig::default());
    let color = engine.target().color_texture();
    let depth = engine.target().depth_texture();

    engine.resize(128, 96).unwrap();

    assert_eq!(engine.target().size(), (128, 96));
    assert_eq!(engine.dimensions(), (128, 96));
    assert!(!engine.backend().is_live(color));
    assert!(!engine.backend().is_live(depth));
    assert!(engine.backend().is_live(engine.target().color_texture()));
}

#[test]
fn test_zero_resize_is_ignored() {
    let mut engine = engine(EngineConfig::default());
    let color = engine.target().color_texture();

    engine.resize(0, 0).unwrap();

    assert_eq!(engine.target().size(), (64, 48));
    assert!(engine.backend().is_live(color));
}

#[test]
fn test_hot_reload_relinks_changed_program() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("custom.wgsl");
    std::fs::write(&path, SCENE_SHADER).unwrap();

    let mut engine = engine(EngineConfig {
        hot_reload: true,
        ..Default::default()
    });
    let model = two_part_model(&mut engine);
    let program = engine.load_program(&path, "mesh").unwrap();
    engine
        .context_mut()
        .add_object(GameObject::new("custom", model, program));

    engine.render_frame().unwrap();
    let before = engine.assets().program(program).unwrap().handle();
    let created = engine.backend().counters().vertex_arrays_created;

    let later = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
    std::fs::File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(later)
        .unwrap();

    let stats = engine.render_frame().unwrap();

    assert_ne!(engine.assets().program(program).unwrap().handle(), before);
    assert!(!engine.backend().is_live(before));
    assert_eq!(stats.vaos_created, 2);
    assert_eq!(
        engine.backend().counters().vertex_arrays_created,
        created + 2
    );
}

#[test]
fn test_broken_reload_keeps_program() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("custom.wgsl");
    std::fs::write(&path, SCENE_SHADER).unwrap();

    let mut engine = engine(EngineConfig {
        hot_reload: true,
        ..Default::default()
    });
    let model = two_part_model(&mut engine);
    let program = engine.load_program(&path, "mesh").unwrap();
    engine
        .context_mut()
        .add_object(GameObject::new("custom", model, program));
    let before = engine.assets().program(program).unwrap().handle();

    std::fs::write(&path, "fn broken(").unwrap();
    let later = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
    std::fs::File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(later)
        .unwrap();

    let stats = engine.render_frame().unwrap();

    assert_eq!(engine.assets().program(program).unwrap().handle(), before);
    assert_eq!(stats.draw_calls, 3);
}
