use glam::Vec3;
use smallvec::SmallVec;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SceneId(Uuid);

impl SceneId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SceneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub base_color_factor: [f32; 4],
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub emissive_factor: [f32; 3],
    pub opacity: f32,
    pub transparent: bool,
    pub wireframe: bool,
    pub flat_shading: bool,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            base_color_factor: [1.0, 1.0, 1.0, 1.0],
            metallic_factor: 0.0,
            roughness_factor: 1.0,
            emissive_factor: [0.0, 0.0, 0.0],
            opacity: 1.0,
            transparent: false,
            wireframe: false,
            flat_shading: false,
        }
    }
}

impl Material {
    pub fn with_color(mut self, rgb: [f32; 3]) -> Self {
        self.set_color(rgb);
        self
    }

    pub fn set_color(&mut self, rgb: [f32; 3]) {
        self.base_color_factor = [rgb[0], rgb[1], rgb[2], self.base_color_factor[3]];
    }

    pub fn color(&self) -> [f32; 3] {
        [self.base_color_factor[0], self.base_color_factor[1], self.base_color_factor[2]]
    }

    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.set_opacity(opacity);
        self
    }

    /// Sets opacity, flagging the material transparent below 1.0.
    pub fn set_opacity(&mut self, opacity: f32) {
        let opacity = opacity.clamp(0.0, 1.0);
        self.opacity = opacity;
        self.base_color_factor[3] = opacity;
        self.transparent = self.transparent || opacity < 1.0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightKind {
    Ambient,
    Hemisphere,
    Directional,
    Point,
    Spot,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    pub kind: LightKind,
    pub color: [f32; 3],
    pub intensity: f32,
    pub position: Vec3,
    pub cast_shadow: bool,
}

impl Light {
    pub fn ambient(color: [f32; 3], intensity: f32) -> Self {
        Self { kind: LightKind::Ambient, color, intensity, position: Vec3::ZERO, cast_shadow: false }
    }

    pub fn hemisphere(color: [f32; 3], intensity: f32) -> Self {
        Self { kind: LightKind::Hemisphere, color, intensity, position: Vec3::Y, cast_shadow: false }
    }

    pub fn directional(position: Vec3, color: [f32; 3], intensity: f32) -> Self {
        Self { kind: LightKind::Directional, color, intensity, position, cast_shadow: false }
    }

    pub fn point(position: Vec3, color: [f32; 3], intensity: f32) -> Self {
        Self { kind: LightKind::Point, color, intensity, position, cast_shadow: false }
    }

    pub fn spot(position: Vec3, color: [f32; 3], intensity: f32) -> Self {
        Self { kind: LightKind::Spot, color, intensity, position, cast_shadow: false }
    }

    /// Ambient and hemisphere lights have no direction and therefore cannot cast shadows.
    pub fn can_cast_shadow(&self) -> bool {
        matches!(self.kind, LightKind::Directional | LightKind::Point | LightKind::Spot)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Group,
    Mesh { material: Material, vertex_count: usize },
    Light(Light),
    Helper,
}

#[derive(Debug, Clone)]
pub struct SceneNode {
    pub name: String,
    pub kind: NodeKind,
    pub position: Vec3,
    pub visible: bool,
    parent: Option<NodeId>,
    children: SmallVec<[NodeId; 4]>,
}

impl SceneNode {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn material(&self) -> Option<&Material> {
        match &self.kind {
            NodeKind::Mesh { material, .. } => Some(material),
            _ => None,
        }
    }

    pub fn light(&self) -> Option<&Light> {
        match &self.kind {
            NodeKind::Light(light) => Some(light),
            _ => None,
        }
    }
}

/// Retained scene graph owned by the 3D environment.
#[derive(Debug)]
pub struct SceneGraph {
    id: SceneId,
    root: NodeId,
    nodes: HashMap<NodeId, SceneNode>,
    next_id: u64,
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneGraph {
    pub fn new() -> Self {
        let root = NodeId(0);
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            SceneNode {
                name: "root".to_string(),
                kind: NodeKind::Group,
                position: Vec3::ZERO,
                visible: true,
                parent: None,
                children: SmallVec::new(),
            },
        );
        Self { id: SceneId::new(), root, nodes, next_id: 1 }
    }

    pub fn id(&self) -> SceneId {
        self.id
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn node(&self, id: NodeId) -> Option<&SceneNode> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut SceneNode> {
        self.nodes.get_mut(&id)
    }

    /// Adds a node under `parent`, falling back to the root when `parent` is unknown.
    pub fn add(&mut self, parent: NodeId, name: impl Into<String>, kind: NodeKind) -> NodeId {
        let parent = if self.nodes.contains_key(&parent) { parent } else { self.root };
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            id,
            SceneNode {
                name: name.into(),
                kind,
                position: Vec3::ZERO,
                visible: true,
                parent: Some(parent),
                children: SmallVec::new(),
            },
        );
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.push(id);
        }
        id
    }

    pub fn add_group(&mut self, parent: NodeId, name: impl Into<String>) -> NodeId {
        self.add(parent, name, NodeKind::Group)
    }

    pub fn add_mesh(&mut self, parent: NodeId, name: impl Into<String>, vertex_count: usize) -> NodeId {
        self.add(parent, name, NodeKind::Mesh { material: Material::default(), vertex_count })
    }

    pub fn add_light(&mut self, parent: NodeId, name: impl Into<String>, light: Light) -> NodeId {
        self.add(parent, name, NodeKind::Light(light))
    }

    /// Removes `id` and its subtree. The root itself cannot be removed; removing it clears
    /// its children instead. Returns how many nodes were dropped.
    pub fn remove(&mut self, id: NodeId) -> usize {
        if id == self.root {
            let children: Vec<NodeId> = self.nodes[&self.root].children.to_vec();
            return children.into_iter().map(|child| self.remove(child)).sum();
        }
        let Some(node) = self.nodes.get(&id) else {
            return 0;
        };
        if let Some(parent) = node.parent.and_then(|parent| self.nodes.get_mut(&parent)) {
            parent.children.retain(|child| *child != id);
        }
        let mut stack = vec![id];
        let mut removed = 0;
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.remove(&next) {
                stack.extend(node.children.iter().copied());
                removed += 1;
            }
        }
        removed
    }

    /// Drops every node except the root.
    pub fn clear(&mut self) {
        self.remove(self.root);
    }

    /// Meshes under `group` in depth-first insertion order. `group` itself is included when
    /// it is a mesh.
    pub fn meshes_under(&self, group: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![group];
        while let Some(next) = stack.pop() {
            let Some(node) = self.nodes.get(&next) else {
                continue;
            };
            if matches!(node.kind, NodeKind::Mesh { .. }) {
                out.push(next);
            }
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    pub fn lights(&self) -> Vec<NodeId> {
        let mut lights: Vec<NodeId> =
            self.nodes.iter().filter(|(_, node)| node.light().is_some()).map(|(id, _)| *id).collect();
        lights.sort();
        lights
    }

    pub fn material_mut(&mut self, id: NodeId) -> Option<&mut Material> {
        match &mut self.nodes.get_mut(&id)?.kind {
            NodeKind::Mesh { material, .. } => Some(material),
            _ => None,
        }
    }

    pub fn light_mut(&mut self, id: NodeId) -> Option<&mut Light> {
        match &mut self.nodes.get_mut(&id)?.kind {
            NodeKind::Light(light) => Some(light),
            _ => None,
        }
    }

    /// Vertex total across meshes, a rough stand-in for GPU buffer usage.
    pub fn vertex_count(&self) -> usize {
        self.nodes
            .values()
            .map(|node| match node.kind {
                NodeKind::Mesh { vertex_count, .. } => vertex_count,
                _ => 0,
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meshes_are_listed_depth_first() {
        let mut scene = SceneGraph::new();
        let group = scene.add_group(scene.root(), "group");
        let a = scene.add_mesh(group, "a", 3);
        let inner = scene.add_group(group, "inner");
        let b = scene.add_mesh(inner, "b", 3);
        let c = scene.add_mesh(group, "c", 3);
        scene.add_light(group, "sun", Light::directional(Vec3::ONE, [1.0; 3], 1.0));
        assert_eq!(scene.meshes_under(group), vec![a, b, c]);
    }

    #[test]
    fn removing_a_group_drops_its_subtree() {
        let mut scene = SceneGraph::new();
        let group = scene.add_group(scene.root(), "group");
        scene.add_mesh(group, "a", 3);
        scene.add_mesh(group, "b", 3);
        assert_eq!(scene.remove(group), 3);
        assert!(scene.is_empty());
        assert_eq!(scene.remove(group), 0);
    }

    #[test]
    fn clear_keeps_the_root() {
        let mut scene = SceneGraph::new();
        scene.add_mesh(scene.root(), "a", 12);
        scene.add_light(scene.root(), "fill", Light::ambient([1.0; 3], 0.3));
        scene.clear();
        assert_eq!(scene.len(), 1);
        assert!(scene.contains(scene.root()));
        assert_eq!(scene.vertex_count(), 0);
    }

    #[test]
    fn opacity_marks_material_transparent() {
        let mut material = Material::default();
        material.set_opacity(0.4);
        assert!(material.transparent);
        assert!((material.base_color_factor[3] - 0.4).abs() < f32::EPSILON);
    }
}
