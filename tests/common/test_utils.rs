use std::{num::NonZeroU32, sync::Arc};

use scene_split::{
    Config, Context, Request,
    data_structures::plan::{PrimitiveCost, PrimitiveRef},
    dispatch::MemoryInvoker,
    resources::blob::MemoryBlobStore,
    topology::MemoryBroker,
};

pub const BUCKET: &str = "distributed-path-tracer";
pub const ROOT: &str = "scenes/boat";
pub const SCENE_NAME: &str = "boat";
pub const WOOD_PNG_LEN: usize = 1000;

/// Costs of the three primitives in `BOAT_GLTF`, in traversal order.
pub const HULL_0_COST: u64 = 120 + 120 + 80 + 2 * WOOD_PNG_LEN as u64 + 64;
pub const HULL_1_COST: u64 = 240;
pub const MAST_0_COST: u64 = 36;

/**
 * A small scene:
 * - node 0 -> mesh "hull" with a textured and an untextured primitive
 * - node 1 has no mesh
 * - node 2 -> mesh "mast" with one primitive and no material
 * - node 3 -> "hull" again
 *
 * Material 0 uses `textures/wood.png` for base colour and metallic-roughness
 * and an embedded 64 byte image as normal map.
 */
pub const BOAT_GLTF: &str = r#"{
  "asset": { "version": "2.0" },
  "scene": 0,
  "scenes": [ { "nodes": [0, 1, 2, 3] } ],
  "nodes": [
    { "mesh": 0 },
    { "name": "light" },
    { "mesh": 1 },
    { "mesh": 0, "translation": [2.0, 0.0, 0.0] }
  ],
  "meshes": [
    {
      "name": "hull",
      "primitives": [
        { "attributes": { "POSITION": 0, "NORMAL": 1, "TEXCOORD_0": 2 }, "material": 0 },
        { "attributes": { "POSITION": 3 }, "material": 1 }
      ]
    },
    {
      "name": "mast",
      "primitives": [ { "attributes": { "POSITION": 4 } } ]
    }
  ],
  "materials": [
    {
      "pbrMetallicRoughness": {
        "baseColorTexture": { "index": 0 },
        "metallicRoughnessTexture": { "index": 0 }
      },
      "normalTexture": { "index": 1 }
    },
    { "pbrMetallicRoughness": { "baseColorFactor": [1.0, 1.0, 1.0, 1.0] } }
  ],
  "textures": [ { "source": 0 }, { "source": 1 } ],
  "images": [
    { "uri": "textures/wood.png" },
    { "bufferView": 5, "mimeType": "image/png" }
  ],
  "accessors": [
    { "bufferView": 0, "componentType": 5126, "count": 10, "type": "VEC3", "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 1.0] },
    { "bufferView": 1, "componentType": 5126, "count": 10, "type": "VEC3" },
    { "bufferView": 2, "componentType": 5126, "count": 10, "type": "VEC2" },
    { "bufferView": 3, "componentType": 5126, "count": 20, "type": "VEC3", "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 1.0] },
    { "bufferView": 4, "componentType": 5126, "count": 3, "type": "VEC3", "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 1.0] }
  ],
  "bufferViews": [
    { "buffer": 0, "byteOffset": 0, "byteLength": 120 },
    { "buffer": 0, "byteOffset": 120, "byteLength": 120 },
    { "buffer": 0, "byteOffset": 240, "byteLength": 80 },
    { "buffer": 0, "byteOffset": 320, "byteLength": 240 },
    { "buffer": 0, "byteOffset": 560, "byteLength": 36 },
    { "buffer": 0, "byteOffset": 596, "byteLength": 64 }
  ],
  "buffers": [ { "uri": "scene.bin", "byteLength": 660 } ]
}"#;

/// Blob store holding `BOAT_GLTF` and its external texture.
pub fn boat_store() -> MemoryBlobStore {
    MemoryBlobStore::new()
        .with_object(BUCKET, &format!("{ROOT}/scene.gltf"), BOAT_GLTF)
        .with_object(BUCKET, &format!("{ROOT}/textures/wood.png"), vec![0u8; WOOD_PNG_LEN])
}

/// `n` primitives of a single mesh called `mesh`.
pub fn refs(n: usize) -> Vec<PrimitiveRef> {
    (0..n)
        .map(|primitive| PrimitiveRef {
            mesh: 0,
            mesh_name: "mesh".to_string(),
            primitive,
        })
        .collect()
}

pub fn costs(bytes: &[u64]) -> Vec<PrimitiveCost> {
    bytes
        .iter()
        .map(|b| PrimitiveCost {
            geometry: *b,
            material: 0,
        })
        .collect()
}

pub fn workers(n: u32) -> Option<NonZeroU32> {
    NonZeroU32::new(n)
}

pub fn request() -> Request {
    Request {
        scene_bucket: BUCKET.to_string(),
        scene_root: ROOT.to_string(),
        scene_name: SCENE_NAME.to_string(),
        num_workers: Some(2),
        memory_per_worker_bytes: None,
        memory_per_worker_gb: None,
    }
}

/// A context over in-memory collaborators, with typed handles kept for assertions.
pub struct TestRig {
    pub ctx: Context,
    pub store: Arc<MemoryBlobStore>,
    pub broker: Arc<MemoryBroker>,
    pub invoker: Arc<MemoryInvoker>,
}

impl TestRig {
    pub fn new(config: Config) -> Self {
        Self::with_store(config, boat_store())
    }

    pub fn with_store(config: Config, store: MemoryBlobStore) -> Self {
        let store = Arc::new(store);
        let broker = Arc::new(MemoryBroker::new());
        let invoker = Arc::new(MemoryInvoker::new());
        let ctx = Context::new(config, store.clone(), broker.clone(), invoker.clone());
        Self {
            ctx,
            store,
            broker,
            invoker,
        }
    }
}
