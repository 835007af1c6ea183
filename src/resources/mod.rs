use std::{
    collections::HashSet,
    io::{BufReader, Cursor},
};

use crate::{
    data_structures::{
        descriptor::SceneLocation,
        scene_graph::{
            Attributes, BufferView, Image, ImageSource, Material, Mesh, Node, Primitive,
            SceneGraph,
        },
    },
    error::SceneLoadError,
    resources::blob::BlobStore,
};

/**
 * This module contains all logic for getting scenes and their sizes out of external storage.
 */
pub mod blob;

/// Downloads `<root>/<scene_file>` and loads it.
pub async fn fetch_scene(
    store: &dyn BlobStore,
    location: &SceneLocation,
    scene_file: &str,
) -> Result<SceneGraph, SceneLoadError> {
    let key = location.key(scene_file);
    log::info!("Downloading scene {}/{}", location.bucket, key);
    let bytes = store.download_object(&location.bucket, &key).await?;
    load_scene_gltf(&bytes)
}

/// Materializes the parts of a glTF document the partitioner needs.
///
/// Nodes are the top-level nodes of the default scene, or of the first scene
/// if the document doesn't name a default. Unnamed meshes are called
/// `mesh_<index>`; no two meshes may end up with the same name.
pub fn load_scene_gltf(bytes: &[u8]) -> Result<SceneGraph, SceneLoadError> {
    let gltf_reader = BufReader::new(Cursor::new(bytes));
    let gltf = gltf::Gltf::from_reader(gltf_reader)?;

    let scene = gltf
        .default_scene()
        .or_else(|| gltf.scenes().next())
        .ok_or(SceneLoadError::NoScene)?;
    let nodes = scene
        .nodes()
        .map(|node| Node {
            mesh: node.mesh().map(|mesh| mesh.index()),
        })
        .collect();

    let meshes: Vec<Mesh> = gltf
        .meshes()
        .map(|mesh| Mesh {
            name: mesh
                .name()
                .map_or_else(|| format!("mesh_{}", mesh.index()), str::to_string),
            primitives: mesh
                .primitives()
                .map(|primitive| Primitive {
                    attributes: Attributes {
                        position: attribute_view(&primitive, gltf::Semantic::Positions),
                        normal: attribute_view(&primitive, gltf::Semantic::Normals),
                        tangent: attribute_view(&primitive, gltf::Semantic::Tangents),
                        tex_coord_0: attribute_view(&primitive, gltf::Semantic::TexCoords(0)),
                    },
                    material: primitive.material().index(),
                })
                .collect(),
        })
        .collect();
    let mut names = HashSet::new();
    if let Some(mesh) = meshes.iter().find(|mesh| !names.insert(mesh.name.as_str())) {
        return Err(SceneLoadError::DuplicateMeshName(mesh.name.clone()));
    }

    let materials = gltf
        .materials()
        .map(|material| {
            let pbr = material.pbr_metallic_roughness();
            Material {
                normal: material
                    .normal_texture()
                    .map(|tex| tex.texture().source().index()),
                occlusion: material
                    .occlusion_texture()
                    .map(|tex| tex.texture().source().index()),
                emissive: material
                    .emissive_texture()
                    .map(|info| info.texture().source().index()),
                base_color: pbr
                    .base_color_texture()
                    .map(|info| info.texture().source().index()),
                metallic_roughness: pbr
                    .metallic_roughness_texture()
                    .map(|info| info.texture().source().index()),
            }
        })
        .collect();

    let images = gltf
        .images()
        .map(|image| {
            let source = match image.source() {
                gltf::image::Source::View { view, mime_type: _ } => ImageSource::Embedded {
                    byte_length: view.length() as u64,
                },
                gltf::image::Source::Uri { uri, mime_type: _ } => match data_uri_length(uri) {
                    Some(byte_length) => ImageSource::Embedded { byte_length },
                    None => ImageSource::Uri(uri.to_string()),
                },
            };
            Image { source }
        })
        .collect();

    let buffer_views = gltf
        .views()
        .map(|view| BufferView {
            byte_length: view.length() as u64,
        })
        .collect();

    Ok(SceneGraph {
        nodes,
        meshes,
        materials,
        images,
        buffer_views,
    })
}

/// Buffer view behind an attribute. Sparse accessors without a view count as absent.
fn attribute_view(primitive: &gltf::Primitive<'_>, semantic: gltf::Semantic) -> Option<usize> {
    primitive
        .get(&semantic)
        .and_then(|accessor| accessor.view())
        .map(|view| view.index())
}

/// Decoded size of a base64 `data:` uri, `None` for anything else.
fn data_uri_length(uri: &str) -> Option<u64> {
    let rest = uri.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    if !header.ends_with(";base64") {
        return Some(payload.len() as u64);
    }
    let padding = payload.bytes().rev().take_while(|b| *b == b'=').count();
    Some((payload.len() / 4 * 3).saturating_sub(padding) as u64)
}
