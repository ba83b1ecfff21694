//! Pipeline and descriptor layouts of the built-in passes.
//!
//! Every pipeline lists the global bindless set at [`GLOBAL_SET`] and its
//! pass set at [`PASS_SET`]. Shader source is supplied by the caller; the
//! wgpu backend ships WGSL matching these layouts.

use strata_assets::ResourceStore;
use strata_gfx::{
    BlendMode, CompareOp, DepthState, DescriptorKind, DescriptorResource, DescriptorSetDesc,
    DescriptorSetHandle, DescriptorSlot, DescriptorWrite, GfxError, GpuDevice, PipelineDesc,
    SamplerKind, TextureFormat, VertexLayout,
};

use crate::pass::{GLOBAL_SET, PASS_SET, PassDescription};

pub const GBUFFER_ALBEDO_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;
pub const GBUFFER_POSITION_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
pub const GBUFFER_NORMAL_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
pub const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;
pub const LIGHTING_OUTPUT_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// Push constant block of GUI draws: material byte offset and kind tag,
/// padded to 16 bytes.
pub const GUI_PUSH_CONSTANT_BYTES: u32 = 16;

const GLOBAL_TEXTURES_BINDING: u32 = 0;
const GLOBAL_LINEAR_SAMPLER_BINDING: u32 = 1;
const GLOBAL_NEAREST_SAMPLER_BINDING: u32 = 2;

/// Bindless texture array plus the two shared samplers.
pub fn global_set_desc(bindless_capacity: u32) -> DescriptorSetDesc {
    DescriptorSetDesc {
        label: "global-set".into(),
        slots: vec![
            DescriptorSlot::new(
                GLOBAL_TEXTURES_BINDING,
                DescriptorKind::TextureArray {
                    count: bindless_capacity,
                },
            ),
            DescriptorSlot::new(GLOBAL_LINEAR_SAMPLER_BINDING, DescriptorKind::Sampler),
            DescriptorSlot::new(GLOBAL_NEAREST_SAMPLER_BINDING, DescriptorKind::Sampler),
        ],
    }
}

pub fn create_global_set(
    device: &mut dyn GpuDevice,
    resources: &ResourceStore,
) -> Result<DescriptorSetHandle, GfxError> {
    let set = device.create_descriptor_set(&global_set_desc(resources.bindless_capacity()))?;
    update_global_set(device, set, resources)?;
    Ok(set)
}

/// Rewrite the bindless array from the store's current table.
pub fn update_global_set(
    device: &mut dyn GpuDevice,
    set: DescriptorSetHandle,
    resources: &ResourceStore,
) -> Result<(), GfxError> {
    device.update_descriptor_set(
        set,
        &[
            DescriptorWrite {
                binding: GLOBAL_TEXTURES_BINDING,
                resource: DescriptorResource::TextureArray(resources.bindless_handles()),
            },
            DescriptorWrite {
                binding: GLOBAL_LINEAR_SAMPLER_BINDING,
                resource: DescriptorResource::Sampler(SamplerKind::Linear),
            },
            DescriptorWrite {
                binding: GLOBAL_NEAREST_SAMPLER_BINDING,
                resource: DescriptorResource::Sampler(SamplerKind::Nearest),
            },
        ],
    )
}

fn set_layouts(bindless_capacity: u32, pass: PassDescription) -> Vec<DescriptorSetDesc> {
    let layouts = vec![
        global_set_desc(bindless_capacity),
        pass.layout().descriptor_set_desc(),
    ];
    debug_assert_eq!(layouts.len(), PASS_SET as usize + 1);
    debug_assert_eq!(GLOBAL_SET, 0);
    layouts
}

fn deferred_layout() -> PassDescription {
    // Slot layout does not depend on capacities.
    PassDescription::Deferred {
        max_objects: 1,
        max_materials: 1,
        max_draws: 1,
    }
}

/// G-buffer pipeline for instanced indirect mesh draws.
pub fn geometry_pipeline_desc(
    label: &str,
    source: &str,
    bindless_capacity: u32,
) -> PipelineDesc {
    PipelineDesc {
        label: label.into(),
        source: source.into(),
        vertex_layout: VertexLayout::Mesh,
        color_formats: vec![
            GBUFFER_ALBEDO_FORMAT,
            GBUFFER_POSITION_FORMAT,
            GBUFFER_NORMAL_FORMAT,
        ],
        blend: BlendMode::Opaque,
        depth: Some(DepthState {
            format: DEPTH_FORMAT,
            write: true,
            compare: CompareOp::Less,
        }),
        set_layouts: set_layouts(bindless_capacity, deferred_layout()),
        push_constant_bytes: 0,
    }
}

/// Full-screen deferred lighting; reads the G-buffer through the pass set.
pub fn lighting_pipeline_desc(source: &str, bindless_capacity: u32) -> PipelineDesc {
    PipelineDesc {
        label: "deferred-lighting".into(),
        source: source.into(),
        vertex_layout: VertexLayout::None,
        color_formats: vec![LIGHTING_OUTPUT_FORMAT],
        blend: BlendMode::Opaque,
        depth: Some(DepthState {
            format: DEPTH_FORMAT,
            write: false,
            compare: CompareOp::Always,
        }),
        set_layouts: set_layouts(bindless_capacity, PassDescription::Lighting),
        push_constant_bytes: 0,
    }
}

/// Sky drawn behind geometry at the far plane, tested against the loaded
/// depth of the geometry pass.
pub fn skybox_pipeline_desc(source: &str, bindless_capacity: u32) -> PipelineDesc {
    PipelineDesc {
        label: "skybox".into(),
        source: source.into(),
        vertex_layout: VertexLayout::None,
        color_formats: vec![LIGHTING_OUTPUT_FORMAT],
        blend: BlendMode::Opaque,
        depth: Some(DepthState {
            format: DEPTH_FORMAT,
            write: false,
            compare: CompareOp::LessEqual,
        }),
        set_layouts: set_layouts(bindless_capacity, PassDescription::Lighting),
        push_constant_bytes: 0,
    }
}

/// UI pipeline; `surface_format` is the format of the images it composites
/// onto.
pub fn gui_pipeline_desc(
    label: &str,
    source: &str,
    bindless_capacity: u32,
    surface_format: TextureFormat,
) -> PipelineDesc {
    PipelineDesc {
        label: label.into(),
        source: source.into(),
        vertex_layout: VertexLayout::Gui,
        color_formats: vec![surface_format],
        blend: BlendMode::Alpha,
        depth: None,
        set_layouts: set_layouts(bindless_capacity, PassDescription::Gui),
        push_constant_bytes: GUI_PUSH_CONSTANT_BYTES,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_assets::StoreConfig;
    use strata_gfx::HeadlessDevice;

    #[test]
    fn pipelines_share_the_global_layout() {
        let global = global_set_desc(64);
        for desc in [
            geometry_pipeline_desc("geo", "", 64),
            lighting_pipeline_desc("", 64),
            skybox_pipeline_desc("", 64),
            gui_pipeline_desc("gui", "", 64, TextureFormat::Rgba8Unorm),
        ] {
            assert_eq!(desc.set_layouts[GLOBAL_SET as usize], global);
            assert_eq!(desc.set_layouts.len(), 2);
        }
    }

    #[test]
    fn geometry_writes_three_targets_and_depth() {
        let desc = geometry_pipeline_desc("geo", "", 8);
        assert_eq!(desc.color_formats.len(), 3);
        let depth = desc.depth.unwrap();
        assert!(depth.write);
        assert_eq!(depth.compare, CompareOp::Less);
        let pass_set = &desc.set_layouts[PASS_SET as usize];
        assert_eq!(
            pass_set.slot(1).map(|s| s.kind),
            Some(DescriptorKind::StorageBuffer)
        );
    }

    #[test]
    fn global_set_tracks_bindless_table() {
        let mut device = HeadlessDevice::new();
        let mut store = ResourceStore::new(
            &mut device,
            StoreConfig {
                bindless_capacity: 4,
                ..StoreConfig::default()
            },
        )
        .unwrap();
        let set = create_global_set(&mut device, &store).unwrap();
        store
            .register_texture(
                &mut device,
                strata_common::ResourceId(1),
                "tex",
                strata_common::Extent2D::new(1, 1),
                vec![0; 4],
            )
            .unwrap();
        update_global_set(&mut device, set, &store).unwrap();
        let writes = device.descriptor_writes(set).unwrap();
        match writes.get(&GLOBAL_TEXTURES_BINDING) {
            Some(DescriptorResource::TextureArray(handles)) => {
                assert_eq!(handles.len(), 4);
                assert_eq!(handles[1], store.texture(strata_common::ResourceId(1)).unwrap().handle());
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
