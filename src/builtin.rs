//! Plugins shipped with the binary: a 2D circle and a 3D torus knot.

use crate::app::PluginHost;
use crate::config::AppConfig;
use crate::environment::Capability;
use crate::params::{parse_hex_color, ParameterChange, ParameterDef, ParameterGroupKind, ParameterStore, ParameterValue};
use crate::plugins::{ActionDescriptor, PluginContext, PluginDescriptor, VisualizationPlugin};
use crate::render_modes::{ApplyOptions, ModeProperties, DEFAULT_MODE};
use crate::scene::NodeId;
use crate::scheduler::AnimationHandle;
use anyhow::{Context, Result};
use glam::{Vec2, Vec3};
use rand::seq::SliceRandom;
use rand::Rng;
use std::f32::consts::TAU;

pub const CIRCLE_ID: &str = "circle";
pub const KNOT_ID: &str = "knot";

/// Registers the builtin plugins and applies `plugins.disabled` from `config`.
pub fn register_builtins(host: &mut PluginHost, config: &AppConfig) -> Result<()> {
    host.register(
        PluginDescriptor::new(CIRCLE_ID, "Circle", Capability::Canvas2D)
            .with_description("Regular polygon approximating a circle"),
        || Box::new(CirclePlugin::default()),
    )?;
    host.register(
        PluginDescriptor::new(KNOT_ID, "Torus Knot", Capability::Scene3D)
            .with_description("(p, q) torus knot with switchable render modes"),
        || Box::new(KnotPlugin::default()),
    )?;
    for id in &config.plugins.disabled {
        if host.descriptor(id).is_some() {
            host.set_plugin_enabled(id, false)?;
            log::info!("[plugin:{id}] disabled by configuration");
        } else {
            log::warn!("[config] cannot disable unknown plugin '{id}'");
        }
    }
    Ok(())
}

fn rgba(rgb: [f32; 3], alpha: f32) -> [f32; 4] {
    [rgb[0], rgb[1], rgb[2], alpha]
}

fn color_param(params: &ParameterStore, id: &str, fallback: [f32; 3]) -> [f32; 3] {
    params.text(id).and_then(parse_hex_color).unwrap_or(fallback)
}

fn hex(rgb: [f32; 3]) -> String {
    let channel = |value: f32| (value.clamp(0.0, 1.0) * 255.0).round() as u8;
    format!("#{:02x}{:02x}{:02x}", channel(rgb[0]), channel(rgb[1]), channel(rgb[2]))
}

#[derive(Default)]
pub struct CirclePlugin {
    angle: f32,
    animation: Option<AnimationHandle>,
}

impl CirclePlugin {
    fn sync_animation(&mut self, ctx: &mut PluginContext<'_>) {
        let spinning = ctx.params.number("spin_speed").unwrap_or(0.0) > 0.0;
        match (spinning, self.animation) {
            (true, None) => self.animation = Some(ctx.request_animation()),
            (false, Some(handle)) => {
                ctx.cancel_animation(handle);
                self.animation = None;
            }
            _ => {}
        }
    }
}

impl VisualizationPlugin for CirclePlugin {
    fn load(&mut self, ctx: &mut PluginContext<'_>) -> Result<()> {
        ctx.define_parameters(
            ParameterGroupKind::Structural,
            vec![
                ParameterDef::slider("segments", "Segments", 64.0, 3.0, 256.0, 1.0),
                ParameterDef::slider("radius", "Radius", 3.0, 0.5, 8.0, 0.1),
            ],
        )?;
        ctx.define_parameters(
            ParameterGroupKind::Visual,
            vec![
                ParameterDef::color("color", "Color", "#4fa3ff"),
                ParameterDef::checkbox("fill", "Fill", false),
                ParameterDef::slider("line_width", "Line width", 2.0, 1.0, 10.0, 0.5),
                ParameterDef::checkbox("show_axes", "Show axes", true),
            ],
        )?;
        ctx.define_parameters(
            ParameterGroupKind::Advanced,
            vec![ParameterDef::slider("spin_speed", "Spin speed", 0.5, 0.0, 5.0, 0.1)
                .with_description("Radians per second")],
        )?;
        ctx.register_action(ActionDescriptor::new("randomize", "Randomize").with_description("Pick a random shape"));
        ctx.register_action(ActionDescriptor::new("reset_view", "Reset view"));
        self.angle = 0.0;
        self.sync_animation(ctx);
        Ok(())
    }

    fn unload(&mut self, _ctx: &mut PluginContext<'_>) -> Result<()> {
        self.animation = None;
        Ok(())
    }

    fn on_parameter_changed(&mut self, ctx: &mut PluginContext<'_>, change: &ParameterChange) -> Result<()> {
        if change.id == "spin_speed" {
            self.sync_animation(ctx);
        }
        Ok(())
    }

    fn animate(&mut self, ctx: &mut PluginContext<'_>, dt: f32) -> Result<bool> {
        let speed = ctx.params.number("spin_speed").unwrap_or(0.0) as f32;
        if speed <= 0.0 {
            self.animation = None;
            return Ok(false);
        }
        self.angle = crate::wrap_angle(self.angle + speed * dt);
        Ok(true)
    }

    fn render(&mut self, ctx: &mut PluginContext<'_>) -> Result<()> {
        let params = &*ctx.params;
        let segments = params.number("segments").unwrap_or(64.0).max(3.0) as usize;
        let radius = params.number("radius").unwrap_or(3.0) as f32;
        let color = rgba(color_param(params, "color", [0.31, 0.64, 1.0]), 1.0);
        let fill = params.flag("fill").unwrap_or(false);
        let width = params.number("line_width").unwrap_or(2.0) as f32;
        let axes = params.flag("show_axes").unwrap_or(true);
        let angle = self.angle;

        let canvas = ctx.canvas().context("circle requires a 2D environment")?;
        let list = canvas.draw_list_mut();
        list.clear();
        if axes {
            let extent = radius * 1.25;
            let axis_color = [0.5, 0.5, 0.5, 0.6];
            list.line(Vec2::new(-extent, 0.0), Vec2::new(extent, 0.0), axis_color, 1.0);
            list.line(Vec2::new(0.0, -extent), Vec2::new(0.0, extent), axis_color, 1.0);
        }
        if fill {
            list.circle(Vec2::ZERO, radius, [color[0], color[1], color[2], 0.25], true);
        }
        let points = (0..segments)
            .map(|i| {
                let theta = angle + TAU * i as f32 / segments as f32;
                Vec2::new(theta.cos(), theta.sin()) * radius
            })
            .collect();
        list.polyline(points, color, width, true);
        list.text(Vec2::new(-radius, -radius * 1.2), format!("{segments} segments"), color);
        Ok(())
    }

    fn execute_action(&mut self, ctx: &mut PluginContext<'_>, id: &str, _args: &[ParameterValue]) -> Result<bool> {
        match id {
            "randomize" => {
                let mut rng = rand::thread_rng();
                let rgb = [rng.gen::<f32>(), rng.gen::<f32>(), rng.gen::<f32>()];
                ctx.params.set("segments", f64::from(rng.gen_range(3_u32..=24)).into(), None)?;
                ctx.params.set("radius", rng.gen_range(1.0..6.0_f64).into(), None)?;
                ctx.params.set("color", hex(rgb).into(), None)?;
                Ok(true)
            }
            "reset_view" => {
                ctx.reset_camera();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

const KNOT_PALETTE: [[f32; 3]; 6] = [
    [0.96, 0.42, 0.27],
    [0.98, 0.77, 0.25],
    [0.36, 0.8, 0.45],
    [0.25, 0.62, 1.0],
    [0.6, 0.4, 0.95],
    [0.95, 0.35, 0.65],
];
const KNOT_MODES: [(&str, &str); 7] = [
    ("standard", "Standard"),
    ("flat", "Flat"),
    ("metallic", "Metallic"),
    ("glass", "Glass"),
    ("wireframe", "Wireframe"),
    ("neon", "Neon"),
    ("disco", "Disco"),
];

/// The configured default mode if the knot offers it, `standard` otherwise.
fn knot_mode_or_standard(configured: &str) -> &'static str {
    match KNOT_MODES.iter().find(|(id, _)| *id == configured) {
        Some((id, _)) => *id,
        None => {
            log::warn!("[plugin:{KNOT_ID}] default render mode '{configured}' is not offered, using '{DEFAULT_MODE}'");
            DEFAULT_MODE
        }
    }
}

/// Tube samples per mesh chunk.
const SAMPLES_PER_CHUNK: usize = 16;

/// Point on a (p, q) torus knot for `t` in `[0, TAU)`.
pub fn knot_point(p: f32, q: f32, t: f32) -> Vec3 {
    let r = 2.0 + (q * t).cos();
    Vec3::new(r * (p * t).cos(), r * (p * t).sin(), -(q * t).sin())
}

#[derive(Default)]
pub struct KnotPlugin {
    group: Option<NodeId>,
    palette: Vec<[f32; 3]>,
    animation: Option<AnimationHandle>,
}

impl KnotPlugin {
    fn rebuild(&mut self, ctx: &mut PluginContext<'_>) -> Result<()> {
        let p = ctx.params.number("p").unwrap_or(2.0) as f32;
        let q = ctx.params.number("q").unwrap_or(3.0) as f32;
        let tubular = ctx.params.number("tubular_segments").unwrap_or(96.0).max(3.0) as usize;
        let radial = ctx.params.number("radial_segments").unwrap_or(12.0).max(3.0) as usize;

        let scene = ctx.scene().context("knot requires a 3D environment")?;
        let graph = scene.scene_mut();
        if let Some(previous) = self.group.take() {
            graph.remove(previous);
        }
        let root = graph.root();
        let group = graph.add_group(root, "knot");
        let chunks = tubular.div_ceil(SAMPLES_PER_CHUNK);
        for chunk in 0..chunks {
            let samples = SAMPLES_PER_CHUNK.min(tubular - chunk * SAMPLES_PER_CHUNK);
            graph.add_mesh(group, format!("knot.segment{chunk}"), (samples + 1) * (radial + 1));
        }
        self.group = Some(group);

        let extent = (0..tubular)
            .map(|i| knot_point(p, q, TAU * i as f32 / tubular as f32).length())
            .fold(0.0_f32, f32::max);
        let fov_y = scene.fov_y();
        scene.orbit_mut().frame_sphere(Vec3::ZERO, extent * 1.2, fov_y);
        self.apply_mode(ctx)
    }

    fn options(&self, ctx: &PluginContext<'_>) -> ApplyOptions {
        let multicolor = ctx.params.flag("multicolor").unwrap_or(false);
        ApplyOptions {
            base_color: color_param(&*ctx.params, "color", KNOT_PALETTE[0]),
            palette: if multicolor { self.palette.clone() } else { Vec::new() },
            opacity: ctx.params.number("opacity").unwrap_or(1.0) as f32,
            ..ctx.apply_options()
        }
    }

    fn apply_mode(&mut self, ctx: &mut PluginContext<'_>) -> Result<()> {
        let Some(group) = self.group else {
            return Ok(());
        };
        let mode = ctx.params.text("render_mode").unwrap_or(DEFAULT_MODE).to_string();
        let options = self.options(ctx);
        let applied = ctx.apply_render_mode(group, &mode, &options).context("knot requires a 3D environment")?;
        if applied.fallback {
            log::warn!("[plugin:{KNOT_ID}] render mode '{mode}' unavailable, using '{}'", applied.mode);
        }
        Ok(())
    }

    fn update_appearance(&mut self, ctx: &mut PluginContext<'_>) {
        let Some(group) = self.group else {
            return;
        };
        let options = self.options(ctx);
        let props = ModeProperties {
            opacity: Some(options.opacity),
            color: Some(options.base_color),
            palette: (!options.palette.is_empty()).then_some(options.palette),
        };
        ctx.update_render_properties(group, &props);
    }

    fn rotation_speed(ctx: &PluginContext<'_>) -> f32 {
        if ctx.params.flag("auto_rotate").unwrap_or(false) {
            ctx.params.number("rotation_speed").unwrap_or(0.0) as f32
        } else {
            0.0
        }
    }

    fn sync_animation(&mut self, ctx: &mut PluginContext<'_>) {
        let rotating = Self::rotation_speed(ctx) > 0.0;
        match (rotating, self.animation) {
            (true, None) => self.animation = Some(ctx.request_animation()),
            (false, Some(handle)) => {
                ctx.cancel_animation(handle);
                self.animation = None;
            }
            _ => {}
        }
    }
}

impl VisualizationPlugin for KnotPlugin {
    fn load(&mut self, ctx: &mut PluginContext<'_>) -> Result<()> {
        let initial_mode = knot_mode_or_standard(&ctx.render.default_mode);
        ctx.define_parameters(
            ParameterGroupKind::Structural,
            vec![
                ParameterDef::slider("p", "P (winds)", 2.0, 1.0, 10.0, 1.0),
                ParameterDef::slider("q", "Q (loops)", 3.0, 1.0, 10.0, 1.0),
                ParameterDef::slider("tubular_segments", "Tubular segments", 96.0, 16.0, 512.0, 1.0),
                ParameterDef::slider("radial_segments", "Radial segments", 12.0, 3.0, 32.0, 1.0),
            ],
        )?;
        ctx.define_parameters(
            ParameterGroupKind::Visual,
            vec![
                ParameterDef::dropdown("render_mode", "Render mode", initial_mode, &KNOT_MODES),
                ParameterDef::color("color", "Color", &hex(KNOT_PALETTE[0])),
                ParameterDef::slider("opacity", "Opacity", 1.0, 0.1, 1.0, 0.05),
                ParameterDef::checkbox("multicolor", "Multicolor", false),
            ],
        )?;
        ctx.define_parameters(
            ParameterGroupKind::Advanced,
            vec![
                ParameterDef::slider("rotation_speed", "Rotation speed", 0.4, 0.0, 3.0, 0.05),
                ParameterDef::checkbox("auto_rotate", "Auto rotate", true),
            ],
        )?;
        ctx.register_action(ActionDescriptor::new("shuffle_palette", "Shuffle palette"));
        ctx.register_action(ActionDescriptor::new("reset_view", "Reset view"));
        self.palette = KNOT_PALETTE.to_vec();
        self.rebuild(ctx)?;
        self.sync_animation(ctx);
        Ok(())
    }

    fn unload(&mut self, ctx: &mut PluginContext<'_>) -> Result<()> {
        if let (Some(group), Some(scene)) = (self.group.take(), ctx.scene()) {
            scene.scene_mut().remove(group);
        }
        self.animation = None;
        Ok(())
    }

    fn on_parameter_changed(&mut self, ctx: &mut PluginContext<'_>, change: &ParameterChange) -> Result<()> {
        match change.group {
            ParameterGroupKind::Structural => self.rebuild(ctx)?,
            _ if change.id == "render_mode" => self.apply_mode(ctx)?,
            _ if change.id == "rotation_speed" || change.id == "auto_rotate" => self.sync_animation(ctx),
            _ => self.update_appearance(ctx),
        }
        Ok(())
    }

    fn animate(&mut self, ctx: &mut PluginContext<'_>, dt: f32) -> Result<bool> {
        let speed = Self::rotation_speed(ctx);
        if speed <= 0.0 {
            self.animation = None;
            return Ok(false);
        }
        let scene = ctx.scene().context("knot requires a 3D environment")?;
        scene.orbit_mut().orbit(Vec2::new(speed * dt, 0.0));
        Ok(true)
    }

    fn execute_action(&mut self, ctx: &mut PluginContext<'_>, id: &str, _args: &[ParameterValue]) -> Result<bool> {
        match id {
            "shuffle_palette" => {
                self.palette.shuffle(&mut rand::thread_rng());
                if ctx.params.flag("multicolor") == Some(true) {
                    self.update_appearance(ctx);
                } else {
                    ctx.params.set("multicolor", true.into(), Some(ParameterGroupKind::Visual))?;
                }
                Ok(true)
            }
            "reset_view" => {
                ctx.reset_camera();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn mesh_group(&self) -> Option<NodeId> {
        self.group
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn knot_points_stay_on_the_torus() {
        for i in 0..32 {
            let point = knot_point(2.0, 3.0, TAU * i as f32 / 32.0);
            let ring = Vec2::new(point.x, point.y).length() - 2.0;
            assert!((ring * ring + point.z * point.z - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn hex_round_trips_through_the_color_parser() {
        let rgb = [1.0, 0.5, 0.0];
        let parsed = parse_hex_color(&hex(rgb)).expect("valid hex");
        assert!((parsed[1] - 0.5).abs() < 0.01);
        assert_eq!(hex(KNOT_PALETTE[3]), "#409eff");
    }
}
