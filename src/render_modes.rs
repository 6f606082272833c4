//! Named material + lighting bundles applied to a live scene graph.
//!
//! The compositor remembers exactly which nodes it inserted into each scene so the next
//! [`RenderModeCompositor::apply_mode`] can remove them without re-running the previous
//! bundle's recipes.

use crate::scene::{Light, Material, NodeId, NodeKind, SceneGraph, SceneId};
use bitflags::bitflags;
use glam::Vec3;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};

pub const DEFAULT_MODE: &str = "standard";

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EffectFlags: u8 {
        const CAST_SHADOWS = 1 << 0;
        const TRANSPARENT = 1 << 1;
        const WIREFRAME = 1 << 2;
        const FLAT_SHADING = 1 << 3;
        const EMISSIVE = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MaterialInputs {
    pub base_color: [f32; 3],
    pub opacity: f32,
    /// Position of the mesh among the target group's meshes.
    pub index: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct LightingInputs {
    pub accent: [f32; 3],
    pub shadows: bool,
}

pub type MaterialRecipe = fn(&MaterialInputs) -> Material;
pub type LightingRecipe = fn(&LightingInputs) -> Vec<Light>;

#[derive(Clone)]
pub struct RenderModeBundle {
    pub id: String,
    pub label: String,
    pub material: MaterialRecipe,
    pub lighting: LightingRecipe,
    pub effects: EffectFlags,
}

impl RenderModeBundle {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        material: MaterialRecipe,
        lighting: LightingRecipe,
        effects: EffectFlags,
    ) -> Self {
        Self { id: id.into(), label: label.into(), material, lighting, effects }
    }
}

impl std::fmt::Debug for RenderModeBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderModeBundle").field("id", &self.id).field("effects", &self.effects).finish()
    }
}

#[derive(Debug, Clone)]
pub struct ApplyOptions {
    pub base_color: [f32; 3],
    /// Assigned round-robin by mesh index when non-empty.
    pub palette: Vec<[f32; 3]>,
    pub opacity: f32,
    pub accent: [f32; 3],
    pub shadows: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self { base_color: [0.8, 0.8, 0.8], palette: Vec::new(), opacity: 1.0, accent: [0.25, 0.62, 1.0], shadows: true }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppliedMode {
    pub mode: String,
    pub fallback: bool,
    pub removed: usize,
    pub lights: Vec<NodeId>,
    pub meshes: usize,
}

/// In-place edits for an already applied bundle.
#[derive(Debug, Clone, Default)]
pub struct ModeProperties {
    pub opacity: Option<f32>,
    pub color: Option<[f32; 3]>,
    pub palette: Option<Vec<[f32; 3]>>,
}

#[derive(Debug)]
struct AppliedState {
    mode: String,
    effects: EffectFlags,
    objects: Vec<NodeId>,
}

pub struct RenderModeCompositor {
    bundles: BTreeMap<String, RenderModeBundle>,
    applied: HashMap<SceneId, AppliedState>,
}

impl Default for RenderModeCompositor {
    fn default() -> Self {
        Self::with_builtin_modes()
    }
}

impl RenderModeCompositor {
    pub fn empty() -> Self {
        Self { bundles: BTreeMap::new(), applied: HashMap::new() }
    }

    pub fn with_builtin_modes() -> Self {
        let mut compositor = Self::empty();
        for bundle in builtin_bundles() {
            compositor.register(bundle);
        }
        compositor
    }

    /// Adds or replaces a bundle.
    pub fn register(&mut self, bundle: RenderModeBundle) {
        if self.bundles.insert(bundle.id.clone(), bundle).is_some() {
            log::debug!("[render-mode] replaced an existing bundle");
        }
    }

    pub fn has_mode(&self, id: &str) -> bool {
        self.bundles.contains_key(id)
    }

    pub fn mode_ids(&self) -> impl Iterator<Item = &str> {
        self.bundles.keys().map(String::as_str)
    }

    pub fn bundle(&self, id: &str) -> Option<&RenderModeBundle> {
        self.bundles.get(id)
    }

    pub fn current_mode(&self, scene: SceneId) -> Option<&str> {
        self.applied.get(&scene).map(|state| state.mode.as_str())
    }

    /// Nodes this compositor inserted into `scene` for the current bundle.
    pub fn tracked_objects(&self, scene: SceneId) -> &[NodeId] {
        self.applied.get(&scene).map(|state| state.objects.as_slice()).unwrap_or(&[])
    }

    pub fn apply_mode(
        &mut self,
        scene: &mut SceneGraph,
        target_group: NodeId,
        mode_id: &str,
        options: &ApplyOptions,
    ) -> AppliedMode {
        let removed = self.remove_tracked(scene);

        let (bundle, fallback) = match self.bundles.get(mode_id) {
            Some(bundle) => (bundle.clone(), false),
            None => {
                log::warn!("[render-mode] unknown mode '{mode_id}', using '{DEFAULT_MODE}'");
                match self.bundles.get(DEFAULT_MODE) {
                    Some(bundle) => (bundle.clone(), true),
                    None => (standard_bundle(), true),
                }
            }
        };

        let lighting = LightingInputs { accent: options.accent, shadows: options.shadows };
        let cast_shadows = options.shadows && bundle.effects.contains(EffectFlags::CAST_SHADOWS);
        let root = scene.root();
        let mut objects = Vec::new();
        for (index, mut light) in (bundle.lighting)(&lighting).into_iter().enumerate() {
            light.cast_shadow = cast_shadows && light.can_cast_shadow();
            objects.push(scene.add_light(root, format!("mode:{}:light{index}", bundle.id), light));
        }
        let lights = objects.clone();
        if bundle.effects.contains(EffectFlags::EMISSIVE) {
            objects.push(scene.add(root, format!("mode:{}:glow", bundle.id), NodeKind::Helper));
        }

        let meshes = scene.meshes_under(target_group);
        for (index, mesh) in meshes.iter().enumerate() {
            let base_color = pick_color(&options.palette, options.base_color, index);
            let inputs = MaterialInputs { base_color, opacity: options.opacity, index };
            let mut material = (bundle.material)(&inputs);
            apply_effects(&mut material, bundle.effects);
            if let Some(slot) = scene.material_mut(*mesh) {
                *slot = material;
            }
        }

        log::debug!(
            "[render-mode] '{}' on scene {}: {} object(s) removed, {} added, {} mesh(es)",
            bundle.id,
            scene.id(),
            removed,
            objects.len(),
            meshes.len()
        );
        self.applied.insert(scene.id(), AppliedState { mode: bundle.id.clone(), effects: bundle.effects, objects });
        AppliedMode { mode: bundle.id, fallback, removed, lights, meshes: meshes.len() }
    }

    /// Recolours or fades the current bundle's materials without rebuilding lights.
    /// Returns how many meshes were touched.
    pub fn update_properties(&self, props: &ModeProperties, scene: &mut SceneGraph, target_group: NodeId) -> usize {
        let effects = self.applied.get(&scene.id()).map(|state| state.effects).unwrap_or_default();
        let meshes = scene.meshes_under(target_group);
        for (index, mesh) in meshes.iter().enumerate() {
            let Some(material) = scene.material_mut(*mesh) else {
                continue;
            };
            match (&props.palette, props.color) {
                (Some(palette), fallback) if !palette.is_empty() => {
                    material.set_color(pick_color(palette, fallback.unwrap_or(material.color()), index));
                }
                (_, Some(color)) => material.set_color(color),
                _ => {}
            }
            if let Some(opacity) = props.opacity {
                material.set_opacity(opacity);
                material.transparent = effects.contains(EffectFlags::TRANSPARENT) || material.opacity < 1.0;
            }
            if effects.contains(EffectFlags::EMISSIVE) {
                material.emissive_factor = scaled(material.color(), 0.6);
            }
        }
        meshes.len()
    }

    /// Removes this compositor's objects from `scene` and forgets it.
    pub fn clear(&mut self, scene: &mut SceneGraph) -> usize {
        self.remove_tracked(scene)
    }

    /// Drops bookkeeping for a scene that no longer exists.
    pub fn forget(&mut self, scene: SceneId) {
        self.applied.remove(&scene);
    }

    fn remove_tracked(&mut self, scene: &mut SceneGraph) -> usize {
        let Some(previous) = self.applied.remove(&scene.id()) else {
            return 0;
        };
        // Nodes may already be gone if the owning plugin cleared the scene.
        previous.objects.into_iter().map(|node| scene.remove(node)).sum()
    }
}

fn pick_color(palette: &[[f32; 3]], fallback: [f32; 3], index: usize) -> [f32; 3] {
    if palette.is_empty() {
        fallback
    } else {
        palette[index % palette.len()]
    }
}

fn scaled(color: [f32; 3], factor: f32) -> [f32; 3] {
    [color[0] * factor, color[1] * factor, color[2] * factor]
}

fn apply_effects(material: &mut Material, effects: EffectFlags) {
    if effects.contains(EffectFlags::WIREFRAME) {
        material.wireframe = true;
    }
    if effects.contains(EffectFlags::FLAT_SHADING) {
        material.flat_shading = true;
    }
    if effects.contains(EffectFlags::TRANSPARENT) {
        material.transparent = true;
    }
    if effects.contains(EffectFlags::EMISSIVE) && material.emissive_factor == [0.0; 3] {
        material.emissive_factor = scaled(material.color(), 0.6);
    }
}

fn key_light() -> Light {
    Light::directional(Vec3::new(5.0, 10.0, 7.5), [1.0, 1.0, 1.0], 0.8)
}

fn standard_bundle() -> RenderModeBundle {
    RenderModeBundle::new(
        DEFAULT_MODE,
        "Standard",
        |input| Material { metallic_factor: 0.1, roughness_factor: 0.5, ..Material::default() }
            .with_color(input.base_color)
            .with_opacity(input.opacity),
        |_| vec![Light::ambient([1.0; 3], 0.4), key_light()],
        EffectFlags::CAST_SHADOWS,
    )
}

fn builtin_bundles() -> Vec<RenderModeBundle> {
    vec![
        standard_bundle(),
        RenderModeBundle::new(
            "flat",
            "Flat",
            |input| Material::default().with_color(input.base_color).with_opacity(input.opacity),
            |_| vec![Light::ambient([1.0; 3], 1.0)],
            EffectFlags::FLAT_SHADING,
        ),
        RenderModeBundle::new(
            "metallic",
            "Metallic",
            |input| Material { metallic_factor: 0.9, roughness_factor: 0.25, ..Material::default() }
                .with_color(input.base_color)
                .with_opacity(input.opacity),
            |inputs| {
                vec![
                    Light::hemisphere([0.9, 0.95, 1.0], 0.5),
                    key_light(),
                    Light::point(Vec3::new(-6.0, 4.0, -4.0), inputs.accent, 0.6),
                ]
            },
            EffectFlags::CAST_SHADOWS,
        ),
        RenderModeBundle::new(
            "glass",
            "Glass",
            |input| Material { metallic_factor: 0.0, roughness_factor: 0.05, ..Material::default() }
                .with_color(input.base_color)
                .with_opacity(input.opacity.min(0.35)),
            |_| {
                vec![
                    Light::ambient([1.0; 3], 0.3),
                    key_light(),
                    Light::spot(Vec3::new(0.0, 8.0, 0.0), [1.0, 1.0, 1.0], 0.7),
                ]
            },
            EffectFlags::TRANSPARENT | EffectFlags::CAST_SHADOWS,
        ),
        RenderModeBundle::new(
            "wireframe",
            "Wireframe",
            |input| Material::default().with_color(input.base_color).with_opacity(input.opacity),
            |_| vec![Light::ambient([1.0; 3], 1.0)],
            EffectFlags::WIREFRAME,
        ),
        RenderModeBundle::new(
            "neon",
            "Neon",
            |input| Material { roughness_factor: 0.4, ..Material::default() }
                .with_color(input.base_color)
                .with_opacity(input.opacity),
            |inputs| {
                vec![
                    Light::ambient([1.0; 3], 0.1),
                    Light::point(Vec3::new(4.0, 2.0, 4.0), inputs.accent, 1.2),
                    Light::point(Vec3::new(-4.0, 2.0, -4.0), [1.0, 0.1, 0.8], 1.2),
                    Light::point(Vec3::new(0.0, -3.0, 0.0), [0.1, 1.0, 0.6], 0.8),
                ]
            },
            EffectFlags::EMISSIVE,
        ),
        RenderModeBundle::new(
            "disco",
            "Disco",
            |input| Material { metallic_factor: 0.6, roughness_factor: 0.3, ..Material::default() }
                .with_color(input.base_color)
                .with_opacity(input.opacity),
            disco_lights,
            EffectFlags::CAST_SHADOWS | EffectFlags::EMISSIVE,
        ),
    ]
}

fn disco_lights(_inputs: &LightingInputs) -> Vec<Light> {
    let mut rng = rand::thread_rng();
    let count = rng.gen_range(3..=6);
    let mut lights = vec![Light::ambient([1.0; 3], 0.2)];
    for i in 0..count {
        let angle = i as f32 / count as f32 * std::f32::consts::TAU;
        let color = [rng.gen_range(0.2..1.0), rng.gen_range(0.2..1.0), rng.gen_range(0.2..1.0)];
        lights.push(Light::spot(Vec3::new(angle.cos() * 6.0, 6.0, angle.sin() * 6.0), color, 0.9));
    }
    lights
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene_with_meshes(count: usize) -> (SceneGraph, NodeId) {
        let mut scene = SceneGraph::new();
        let group = scene.add_group(scene.root(), "shape");
        for i in 0..count {
            scene.add_mesh(group, format!("part{i}"), 36);
        }
        (scene, group)
    }

    #[test]
    fn unknown_mode_falls_back_to_standard() {
        let (mut scene, group) = scene_with_meshes(1);
        let mut compositor = RenderModeCompositor::default();
        let applied = compositor.apply_mode(&mut scene, group, "sparkle", &ApplyOptions::default());
        assert!(applied.fallback);
        assert_eq!(applied.mode, DEFAULT_MODE);
        assert_eq!(compositor.current_mode(scene.id()), Some(DEFAULT_MODE));
    }

    #[test]
    fn palette_is_assigned_round_robin() {
        let (mut scene, group) = scene_with_meshes(5);
        let mut compositor = RenderModeCompositor::default();
        let red = [1.0, 0.0, 0.0];
        let blue = [0.0, 0.0, 1.0];
        let options = ApplyOptions { palette: vec![red, blue], ..ApplyOptions::default() };
        compositor.apply_mode(&mut scene, group, "flat", &options);
        let colors: Vec<[f32; 3]> = scene
            .meshes_under(group)
            .into_iter()
            .map(|id| scene.node(id).and_then(|node| node.material()).map(Material::color).unwrap())
            .collect();
        assert_eq!(colors, vec![red, blue, red, blue, red]);
    }

    #[test]
    fn shadows_follow_flag_and_option() {
        let (mut scene, group) = scene_with_meshes(1);
        let mut compositor = RenderModeCompositor::default();
        let applied = compositor.apply_mode(&mut scene, group, "standard", &ApplyOptions::default());
        let casting = applied.lights.iter().filter(|id| scene.node(**id).unwrap().light().unwrap().cast_shadow).count();
        assert_eq!(casting, 1, "only the directional key light casts");

        let options = ApplyOptions { shadows: false, ..ApplyOptions::default() };
        let applied = compositor.apply_mode(&mut scene, group, "standard", &options);
        assert!(applied.lights.iter().all(|id| !scene.node(*id).unwrap().light().unwrap().cast_shadow));
    }

    #[test]
    fn update_properties_recolours_in_place() {
        let (mut scene, group) = scene_with_meshes(2);
        let mut compositor = RenderModeCompositor::default();
        compositor.apply_mode(&mut scene, group, "metallic", &ApplyOptions::default());
        let lights_before = scene.lights();
        let props = ModeProperties { opacity: Some(0.5), color: Some([0.0, 1.0, 0.0]), palette: None };
        assert_eq!(compositor.update_properties(&props, &mut scene, group), 2);
        assert_eq!(scene.lights(), lights_before);
        for mesh in scene.meshes_under(group) {
            let material = scene.node(mesh).unwrap().material().unwrap();
            assert_eq!(material.color(), [0.0, 1.0, 0.0]);
            assert!(material.transparent);
            assert!((material.opacity - 0.5).abs() < f32::EPSILON);
        }
    }

    #[test]
    fn clearing_tolerates_nodes_removed_elsewhere() {
        let (mut scene, group) = scene_with_meshes(1);
        let mut compositor = RenderModeCompositor::default();
        compositor.apply_mode(&mut scene, group, "neon", &ApplyOptions::default());
        let first = compositor.tracked_objects(scene.id())[0];
        scene.remove(first);
        let removed = compositor.clear(&mut scene);
        // four lights plus the glow helper, minus the one already gone
        assert_eq!(removed, 4);
        assert!(scene.lights().is_empty());
        assert!(compositor.tracked_objects(scene.id()).is_empty());
    }
}
