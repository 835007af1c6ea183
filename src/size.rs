//! Byte cost of a primitive.
//!
//! Geometry cost is read from the scene's buffer views. Material cost needs the
//! size of every texture the primitive's material references, which lives in the
//! blob store next to the scene and is fetched with a metadata-only query.

use futures::{StreamExt, TryStreamExt, stream};

use crate::{
    data_structures::{
        descriptor::SceneLocation,
        plan::{PrimitiveCost, PrimitiveRef},
        scene_graph::{ImageSource, Primitive, SceneGraph},
    },
    error::SizeLookupError,
    resources::blob::BlobStore,
};

pub struct SizeOracle<'a> {
    store: &'a dyn BlobStore,
    location: &'a SceneLocation,
}

impl<'a> SizeOracle<'a> {
    pub fn new(store: &'a dyn BlobStore, location: &'a SceneLocation) -> Self {
        Self { store, location }
    }

    /// Sum of position/normal/tangent/first-uv buffer views plus the five
    /// material texture slots. Each set slot is charged in full, so an image
    /// shared between slots or materials is counted every time it is used.
    pub async fn cost(
        &self,
        scene: &SceneGraph,
        primitive: &Primitive,
    ) -> Result<PrimitiveCost, SizeLookupError> {
        let geometry = primitive
            .attributes
            .iter()
            .map(|view| scene.view_length(view))
            .sum();

        let Some(material_idx) = primitive.material else {
            return Ok(PrimitiveCost {
                geometry,
                material: 0,
            });
        };
        let material = scene
            .material(material_idx)
            .ok_or(SizeLookupError::UnknownMaterial(material_idx))?;

        let sizes = futures::future::try_join_all(
            material
                .slots()
                .map(|image| self.image_size(scene, image)),
        )
        .await?;

        Ok(PrimitiveCost {
            geometry,
            material: sizes.into_iter().sum(),
        })
    }

    /// Costs every referenced primitive, at most `concurrency` at a time.
    /// The result is in the order of `refs`; the first failed lookup fails the call.
    pub async fn cost_all(
        &self,
        scene: &SceneGraph,
        refs: &[PrimitiveRef],
        concurrency: usize,
    ) -> Result<Vec<PrimitiveCost>, SizeLookupError> {
        stream::iter(refs)
            .map(|prim_ref| async move {
                let primitive = scene
                    .mesh(prim_ref.mesh)
                    .and_then(|mesh| mesh.primitives.get(prim_ref.primitive));
                match primitive {
                    Some(primitive) => {
                        let cost = self.cost(scene, primitive).await?;
                        log::debug!(
                            "{}[{}]: {} bytes geometry, {} bytes textures",
                            prim_ref.mesh_name,
                            prim_ref.primitive,
                            cost.geometry,
                            cost.material
                        );
                        Ok::<_, SizeLookupError>(cost)
                    }
                    None => Ok(PrimitiveCost::default()),
                }
            })
            .buffered(concurrency.max(1))
            .try_collect()
            .await
    }

    async fn image_size(&self, scene: &SceneGraph, image: usize) -> Result<u64, SizeLookupError> {
        let image_ref = scene
            .image(image)
            .ok_or(SizeLookupError::UnknownImage(image))?;
        match &image_ref.source {
            ImageSource::Embedded { byte_length } => Ok(*byte_length),
            ImageSource::Uri(uri) => self
                .store
                .object_size(&self.location.bucket, &self.location.key(uri))
                .await
                .map_err(|source| SizeLookupError::Blob { image, source }),
        }
    }
}
