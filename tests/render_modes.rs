use kestrel_viz::app::{HostSettings, PluginHost};
use kestrel_viz::builtin::{CirclePlugin, KnotPlugin};
use kestrel_viz::environment::Capability;
use kestrel_viz::error::HostError;
use kestrel_viz::plugins::{HookPlugin, PluginDescriptor, RenderSettings};
use kestrel_viz::render_modes::{EffectFlags, RenderModeBundle, DEFAULT_MODE};
use kestrel_viz::scene::{Light, Material, NodeKind, SceneGraph};
use kestrel_viz::surface::HeadlessSurface;
use kestrel_viz::ui::RecordingUi;

fn host_with(settings: HostSettings) -> PluginHost {
    let mut host = PluginHost::new(Box::new(HeadlessSurface::new()), Box::new(RecordingUi::new()), settings);
    host.register(PluginDescriptor::new("circle", "Circle", Capability::Canvas2D), || Box::new(CirclePlugin::default()))
        .unwrap();
    host.register(PluginDescriptor::new("knot", "Knot", Capability::Scene3D), || Box::new(KnotPlugin::default()))
        .unwrap();
    host
}

fn graph(host: &PluginHost) -> &SceneGraph {
    host.environments().scene().scene()
}

fn helper_count(scene: &SceneGraph) -> usize {
    let mut stack = vec![scene.root()];
    let mut count = 0;
    while let Some(id) = stack.pop() {
        let Some(node) = scene.node(id) else { continue };
        if matches!(node.kind, NodeKind::Helper) {
            count += 1;
        }
        stack.extend(node.children().iter().copied());
    }
    count
}

fn materials(host: &PluginHost) -> Vec<Material> {
    let scene = graph(host);
    scene.meshes_under(scene.root()).into_iter().filter_map(|id| scene.node(id)?.material().cloned()).collect()
}

#[test]
fn render_modes_need_an_active_3d_environment() {
    let mut host = host_with(HostSettings::default());
    let options = host.default_apply_options();
    assert!(matches!(host.apply_render_mode("neon", &options), Err(HostError::EnvironmentUnavailable(Capability::Scene3D))));
    host.activate("circle").unwrap();
    assert!(matches!(host.apply_render_mode("neon", &options), Err(HostError::EnvironmentUnavailable(_))));
}

#[test]
fn switching_modes_removes_every_object_of_the_previous_mode() {
    let mut host = host_with(HostSettings::default());
    host.activate("knot").unwrap();
    let scene_id = graph(&host).id();
    assert_eq!(host.runtime().compositor().current_mode(scene_id), Some(DEFAULT_MODE));
    assert_eq!(graph(&host).lights().len(), 2);

    let options = host.default_apply_options();
    let neon = host.apply_render_mode("neon", &options).unwrap();
    assert_eq!(neon.removed, 2);
    assert_eq!(neon.lights.len(), 4);
    assert_eq!(neon.meshes, 6);
    assert_eq!(graph(&host).lights(), neon.lights);
    assert_eq!(helper_count(graph(&host)), 1);

    let flat = host.apply_render_mode("flat", &options).unwrap();
    assert_eq!(flat.removed, 5);
    assert_eq!(graph(&host).lights().len(), 1);
    assert_eq!(helper_count(graph(&host)), 0);
    assert!(materials(&host).iter().all(|material| material.flat_shading));
}

#[test]
fn unknown_modes_fall_back_to_standard() {
    let mut host = host_with(HostSettings::default());
    host.activate("knot").unwrap();
    let options = host.default_apply_options();
    let applied = host.apply_render_mode("holographic", &options).unwrap();
    assert!(applied.fallback);
    assert_eq!(applied.mode, DEFAULT_MODE);
}

#[test]
fn knot_parameters_drive_the_compositor() {
    let mut host = host_with(HostSettings::default());
    host.activate("knot").unwrap();

    host.set_parameter("render_mode", "wireframe", None).unwrap();
    assert!(materials(&host).iter().all(|material| material.wireframe));
    let lights = graph(&host).lights();
    assert_eq!(lights.len(), 1);

    host.set_parameter("color", "#ff0000", None).unwrap();
    host.set_parameter("opacity", 0.5, None).unwrap();
    assert_eq!(graph(&host).lights(), lights, "property updates keep the lights");
    for material in materials(&host) {
        assert_eq!(material.color(), [1.0, 0.0, 0.0]);
        assert_eq!(material.opacity, 0.5);
        assert!(material.transparent);
    }

    host.set_parameter("tubular_segments", 32.0, None).unwrap();
    assert_eq!(materials(&host).len(), 2);
    assert_eq!(graph(&host).lights().len(), 1, "rebuild does not duplicate lights");

    assert!(matches!(host.set_parameter("render_mode", "sparkle", None), Err(HostError::InvalidValue { .. })));
}

#[test]
fn disabled_shadows_keep_every_light_shadowless() {
    let settings = HostSettings {
        render: RenderSettings { shadows: false, ..RenderSettings::default() },
        ..HostSettings::default()
    };
    let mut host = host_with(settings);
    host.activate("knot").unwrap();
    let options = host.default_apply_options();
    assert!(!options.shadows);
    host.apply_render_mode("glass", &options).unwrap();
    let scene = graph(&host);
    assert!(scene.lights().iter().all(|id| scene.node(*id).and_then(|node| node.light()).map_or(false, |l| !l.cast_shadow)));
}

#[test]
fn plugins_can_register_their_own_bundles() {
    let mut host = host_with(HostSettings::default());
    host.register(PluginDescriptor::new("custom", "Custom", Capability::Scene3D), || {
        Box::new(HookPlugin::new().on_load(|ctx| {
            ctx.compositor.register(RenderModeBundle::new(
                "sunset",
                "Sunset",
                |input| Material::default().with_color(input.base_color),
                |_| vec![Light::ambient([1.0, 0.6, 0.3], 0.8)],
                EffectFlags::EMISSIVE,
            ));
            let scene = ctx.scene().expect("scene is bound");
            let graph = scene.scene_mut();
            graph.add_mesh(graph.root(), "plane", 4);
            Ok(())
        }))
    })
    .unwrap();
    host.activate("custom").unwrap();
    let options = host.default_apply_options();
    let applied = host.apply_render_mode("sunset", &options).unwrap();
    assert!(!applied.fallback);
    assert_eq!(applied.meshes, 1);
    assert_eq!(helper_count(graph(&host)), 1);
}

#[test]
fn configured_default_mode_seeds_the_knot() {
    let settings = HostSettings {
        render: RenderSettings { default_mode: "neon".to_string(), ..RenderSettings::default() },
        ..HostSettings::default()
    };
    let mut host = host_with(settings);
    host.activate("knot").unwrap();
    let scene_id = graph(&host).id();
    assert_eq!(host.parameter("render_mode"), Some(&kestrel_viz::params::ParameterValue::Text("neon".into())));
    assert_eq!(host.runtime().compositor().current_mode(scene_id), Some("neon"));

    host.set_parameter("render_mode", "flat", None).unwrap();
    host.reset_parameters(None);
    assert_eq!(host.runtime().compositor().current_mode(scene_id), Some("neon"));
}

#[test]
fn unoffered_default_mode_falls_back_to_standard() {
    let settings = HostSettings {
        render: RenderSettings { default_mode: "holographic".to_string(), ..RenderSettings::default() },
        ..HostSettings::default()
    };
    let mut host = host_with(settings);
    host.activate("knot").unwrap();
    let scene_id = graph(&host).id();
    assert_eq!(host.runtime().compositor().current_mode(scene_id), Some(DEFAULT_MODE));
}
