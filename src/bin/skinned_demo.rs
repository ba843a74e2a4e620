//! Demo scene: a ground plane, a grid of static cubes and a few skinned cubes spinning
//! through a precomputed animation, lit by a shadow-casting sun and a point light.

use clap::Parser;
use glam::{Mat4, Vec3, Vec4};
use skinned_renderer::engine;
use skinned_renderer::resources::{AnimationFrame, MaterialData, MeshData, Model, PrecomputedAnimation, SkinWeight};
use skinned_renderer::{AnimationState, Entity, Light, RendererConfig, RendererResult};

const SPIN_FRAMES: usize = 120;

/// Skinned renderer demo scene.
#[derive(Parser, Debug)]
#[command(name = "skinned_demo", version)]
struct Args {
    /// Frames the CPU may record ahead of the GPU.
    #[arg(long, default_value = "2")]
    frames_in_flight: u32,

    /// Number of shadow cascades.
    #[arg(long, default_value = "3")]
    cascades: u32,

    /// Shadow map resolution per cascade.
    #[arg(long, default_value = "2048")]
    shadow_map_size: u32,

    /// Disable 3x3 percentage-closer filtering.
    #[arg(long)]
    no_pcf: bool,

    /// Tint pixels by the cascade they sample.
    #[arg(long)]
    shadow_debug: bool,

    /// Disable VSync.
    #[arg(long)]
    no_vsync: bool,

    /// Texture used by materials without one.
    #[arg(long)]
    default_texture: Option<String>,
}

impl Args {
    fn config(&self) -> RendererConfig {
        let config = RendererConfig::default()
            .with_frames_in_flight(self.frames_in_flight)
            .with_shadows(self.cascades, self.shadow_map_size)
            .with_shadow_pcf(!self.no_pcf)
            .with_shadow_debug(self.shadow_debug)
            .with_vsync(!self.no_vsync);
        match &self.default_texture {
            Some(path) => config.with_default_texture(path.clone()),
            None => config,
        }
    }
}

fn spinning_cube() -> Model {
    let cube = MeshData::cube();
    let weights = vec![SkinWeight::single(0); cube.vertex_count()];
    let frames = (0..SPIN_FRAMES)
        .map(|i| {
            let angle = i as f32 / SPIN_FRAMES as f32 * std::f32::consts::TAU;
            AnimationFrame::new(&[Mat4::from_rotation_y(angle)])
        })
        .collect();

    Model::new("spinning cube")
        .with_mesh(cube.with_weights(weights))
        .with_material(MaterialData::default().with_diffuse_color(Vec4::new(0.9, 0.3, 0.2, 1.0)))
        .with_animation(PrecomputedAnimation::new("spin", 2.0, frames))
}

fn setup(engine: &mut engine::Engine) -> RendererResult<()> {
    let ground = Model::new("ground")
        .with_mesh(MeshData::plane(40.0, 40.0, 4))
        .with_material(MaterialData::default().with_roughness(0.9));
    let crate_model = Model::new("cube")
        .with_mesh(MeshData::cube())
        .with_material(
            MaterialData::default()
                .with_diffuse_color(Vec4::new(0.6, 0.6, 0.7, 1.0))
                .with_roughness(0.4)
                .with_metallic(0.2),
        );
    engine.load_models(&[ground, crate_model, spinning_cube()])?;

    let scene = engine.scene_mut();
    scene.add_entity(Entity::new("ground", "ground"));
    for x in -3..=3 {
        for z in -3..=3 {
            let id = format!("cube {} {}", x, z);
            scene.add_entity(Entity::new(id, "cube").with_position(Vec3::new(x as f32 * 3.0, 0.5, z as f32 * 3.0)));
        }
    }
    for (i, x) in [-4.5f32, 0.0, 4.5].into_iter().enumerate() {
        scene.add_entity(
            Entity::new(format!("spinner {}", i), "spinning cube")
                .with_position(Vec3::new(x, 2.5, 0.0))
                .with_animation(AnimationState::new(0)),
        );
    }

    scene.set_lights(vec![
        Light::directional(Vec3::new(0.4, 1.0, 0.3), Vec3::new(1.0, 0.95, 0.9), 3.0),
        Light::point(Vec3::new(0.0, 3.0, 4.0), Vec3::new(0.3, 0.5, 1.0), 8.0),
    ])?;
    scene.camera_mut().set_position(Vec3::new(0.0, 12.0, 20.0));
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut time = 0.0f32;
    let result = engine::run("Skinned Renderer", args.config(), setup, move |engine| {
        time += 1.0 / 60.0;
        let eye = Vec3::new(20.0 * (time * 0.2).sin(), 12.0, 20.0 * (time * 0.2).cos());
        engine.scene_mut().camera_mut().set_position(eye);
    });

    if let Err(e) = result {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
