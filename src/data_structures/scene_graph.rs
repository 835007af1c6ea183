//! Scene graph as seen by the partitioner.
//!
//! Provides a flat, read-only view of a glTF document: top-level nodes, the
//! meshes they reference, and just enough of the material/image/buffer-view
//! tables to put a byte cost on every primitive. Nothing in here holds vertex
//! data; sizes are read from the document and from the blob store.

use serde::{Deserialize, Serialize};

/// A loaded scene. Indices in nodes, primitives and materials point into the
/// sibling tables of the same `SceneGraph`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneGraph {
    pub nodes: Vec<Node>,
    pub meshes: Vec<Mesh>,
    pub materials: Vec<Material>,
    pub images: Vec<Image>,
    pub buffer_views: Vec<BufferView>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub mesh: Option<usize>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mesh {
    pub name: String,
    pub primitives: Vec<Primitive>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Primitive {
    pub attributes: Attributes,
    pub material: Option<usize>,
}

/// Buffer-view indices of the attributes that count towards a primitive's
/// geometry cost. Only the first texture-coordinate channel is considered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes {
    pub position: Option<usize>,
    pub normal: Option<usize>,
    pub tangent: Option<usize>,
    pub tex_coord_0: Option<usize>,
}

impl Attributes {
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        [self.position, self.normal, self.tangent, self.tex_coord_0]
            .into_iter()
            .flatten()
    }
}

/// The five texture slots of a PBR material, already resolved to image indices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Material {
    pub normal: Option<usize>,
    pub occlusion: Option<usize>,
    pub emissive: Option<usize>,
    pub base_color: Option<usize>,
    pub metallic_roughness: Option<usize>,
}

impl Material {
    /// Image indices of all set slots. An image used by two slots shows up twice.
    pub fn slots(&self) -> impl Iterator<Item = usize> + '_ {
        [
            self.normal,
            self.occlusion,
            self.emissive,
            self.base_color,
            self.metallic_roughness,
        ]
        .into_iter()
        .flatten()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub source: ImageSource,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageSource {
    /// Stored next to the scene; the string is the key relative to the scene root.
    Uri(String),
    /// Packed into one of the scene's buffers.
    Embedded { byte_length: u64 },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferView {
    pub byte_length: u64,
}

impl SceneGraph {
    pub fn mesh(&self, idx: usize) -> Option<&Mesh> {
        self.meshes.get(idx)
    }

    pub fn material(&self, idx: usize) -> Option<&Material> {
        self.materials.get(idx)
    }

    pub fn image(&self, idx: usize) -> Option<&Image> {
        self.images.get(idx)
    }

    /// Byte length of a buffer view, 0 for an index the document doesn't have.
    pub fn view_length(&self, idx: usize) -> u64 {
        self.buffer_views.get(idx).map_or(0, |view| view.byte_length)
    }
}
