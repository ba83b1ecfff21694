//! Shader -> mesh grouping of the geometry pass.
//!
//! Draws are grouped by shader first, in order of first appearance, then by
//! mesh within a shader. Each mesh group becomes one instanced indirect draw
//! whose instances are contiguous in the draw-instance array.

use std::collections::BTreeMap;

use strata_assets::MeshRange;
use strata_common::ResourceId;
use strata_gfx::PipelineHandle;

use crate::gpu_data::{GpuDrawArguments, GpuDrawInstance};

/// One resolved renderable, ready for batching.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawItem {
    pub object_index: u32,
    pub material_index: u32,
    pub shader: ResourceId,
    pub pipeline: PipelineHandle,
    /// Model id and sub-mesh index; instances share a draw when equal.
    pub mesh_key: (ResourceId, u32),
    pub mesh: MeshRange,
}

/// Consecutive indirect records drawn with one pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderBatch {
    pub shader: ResourceId,
    pub pipeline: PipelineHandle,
    pub first_argument: u32,
    pub argument_count: u32,
}

impl ShaderBatch {
    pub fn byte_offset(&self) -> u64 {
        self.first_argument as u64 * GpuDrawArguments::STRIDE as u64
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrawBatches {
    pub shaders: Vec<ShaderBatch>,
    pub arguments: Vec<GpuDrawArguments>,
    pub instances: Vec<GpuDrawInstance>,
    /// Items dropped because `max_draws` records were already used.
    pub dropped: u32,
}

struct MeshGroup {
    key: (ResourceId, u32),
    mesh: MeshRange,
    items: Vec<usize>,
}

struct ShaderGroup {
    shader: ResourceId,
    pipeline: PipelineHandle,
    meshes: Vec<MeshGroup>,
}

pub fn build_batches(items: &[DrawItem], max_draws: u32) -> DrawBatches {
    let mut groups: Vec<ShaderGroup> = Vec::new();
    let mut group_index: BTreeMap<ResourceId, usize> = BTreeMap::new();
    for (i, item) in items.iter().enumerate() {
        let g = *group_index.entry(item.shader).or_insert_with(|| {
            groups.push(ShaderGroup {
                shader: item.shader,
                pipeline: item.pipeline,
                meshes: Vec::new(),
            });
            groups.len() - 1
        });
        let group = &mut groups[g];
        match group.meshes.iter_mut().find(|m| m.key == item.mesh_key) {
            Some(mesh) => mesh.items.push(i),
            None => group.meshes.push(MeshGroup {
                key: item.mesh_key,
                mesh: item.mesh,
                items: vec![i],
            }),
        }
    }

    let mut batches = DrawBatches::default();
    for group in groups {
        let first_argument = batches.arguments.len() as u32;
        for mesh in group.meshes {
            if batches.arguments.len() as u32 >= max_draws {
                batches.dropped += mesh.items.len() as u32;
                continue;
            }
            batches.arguments.push(GpuDrawArguments {
                index_count: mesh.mesh.index_count,
                instance_count: mesh.items.len() as u32,
                first_index: mesh.mesh.first_index,
                vertex_offset: mesh.mesh.vertex_offset,
                first_instance: batches.instances.len() as u32,
            });
            batches
                .instances
                .extend(mesh.items.iter().map(|&i| GpuDrawInstance {
                    object_index: items[i].object_index,
                    material_index: items[i].material_index,
                }));
        }
        let argument_count = batches.arguments.len() as u32 - first_argument;
        if argument_count > 0 {
            batches.shaders.push(ShaderBatch {
                shader: group.shader,
                pipeline: group.pipeline,
                first_argument,
                argument_count,
            });
        }
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(object: u32, shader: u64, model: u64, first_index: u32) -> DrawItem {
        DrawItem {
            object_index: object,
            material_index: object % 2,
            shader: ResourceId(shader),
            pipeline: PipelineHandle(shader as u32 + 100),
            mesh_key: (ResourceId(model), 0),
            mesh: MeshRange {
                first_index,
                index_count: 36,
                vertex_offset: 0,
            },
        }
    }

    #[test]
    fn groups_by_shader_in_first_appearance_order() {
        let items = [
            item(0, 7, 1, 0),
            item(1, 3, 1, 0),
            item(2, 7, 2, 36),
            item(3, 7, 1, 0),
        ];
        let batches = build_batches(&items, 16);
        let order: Vec<u64> = batches.shaders.iter().map(|b| b.shader.0).collect();
        assert_eq!(order, vec![7, 3]);

        let first = batches.shaders[0];
        assert_eq!(first.argument_count, 2);
        assert_eq!(batches.arguments[0].instance_count, 2);
        assert_eq!(batches.arguments[0].first_instance, 0);
        assert_eq!(batches.arguments[1].first_index, 36);
        assert_eq!(batches.arguments[1].first_instance, 2);

        // Within a mesh group instances keep insertion order.
        let objects: Vec<u32> = batches.instances.iter().map(|i| i.object_index).collect();
        assert_eq!(objects, vec![0, 3, 2, 1]);
        assert_eq!(batches.shaders[1].byte_offset(), 2 * 20);
    }

    #[test]
    fn caps_indirect_records() {
        let items = [item(0, 1, 1, 0), item(1, 1, 2, 36), item(2, 2, 3, 72)];
        let batches = build_batches(&items, 2);
        assert_eq!(batches.arguments.len(), 2);
        assert_eq!(batches.dropped, 1);
        assert_eq!(batches.shaders.len(), 1);
        assert_eq!(batches.instances.len(), 2);
    }

    #[test]
    fn empty_input() {
        let batches = build_batches(&[], 4);
        assert!(batches.shaders.is_empty());
        assert!(batches.arguments.is_empty());
    }
}
