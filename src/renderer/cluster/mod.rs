//! Cluster grid: view-space AABBs per cluster and per-cluster light lists.
//!
//! `build` runs only when the projection, clip planes, framebuffer size or grid
//! dimensions change; `cull` runs every frame. Each dispatch is recorded in its
//! own compute pass, and wgpu orders storage writes of one pass before reads in
//! the next, so build is visible to cull and cull to the lighting passes.

mod layout;
mod overflow;

pub use layout::{ClusterAabb, ClusterLayout, ClusterLights};
pub use overflow::{OverflowEvent, OverflowProbe, OverflowTracker};

use std::mem;

use glam::Mat4;

use crate::error::{GraphicsErrorCode, RenderError, RenderResult, ResultExt};
use crate::renderer::context::RenderContext;
use crate::renderer::pipeline_builder::{compute_pipeline, pipeline_layout};
use crate::renderer::shaders::ShaderSet;

const WORKGROUP_SIZE: u32 = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct BuildKey {
    inverse_proj: [u32; 16],
    screen: [u32; 2],
    dims: [u32; 3],
}

impl BuildKey {
    fn new(layout: &ClusterLayout, inverse_proj: Mat4) -> Self {
        Self {
            inverse_proj: inverse_proj.to_cols_array().map(f32::to_bits),
            screen: layout.screen.to_array(),
            dims: layout.dims.to_array(),
        }
    }
}

pub struct ClusterGrid {
    layout: ClusterLayout,
    aabbs: wgpu::Buffer,
    counts: wgpu::Buffer,
    indices: wgpu::Buffer,
    overflow: OverflowProbe,
    read_layout: wgpu::BindGroupLayout,
    compute_bind_group: wgpu::BindGroup,
    read_bind_group: wgpu::BindGroup,
    build_pipeline: wgpu::ComputePipeline,
    cull_pipeline: wgpu::ComputePipeline,
    built_for: Option<BuildKey>,
}

impl ClusterGrid {
    pub fn new(
        context: &RenderContext,
        shaders: &ShaderSet,
        frame_layout: &wgpu::BindGroupLayout,
        layout: ClusterLayout,
    ) -> RenderResult<Self> {
        layout
            .validate()
            .context(RenderError::general("validating cluster grid"))?;

        let device = &context.device;
        let compute_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("ClusterComputeLayout"),
            entries: &[
                storage_entry(0, false, wgpu::ShaderStages::COMPUTE),
                storage_entry(1, false, wgpu::ShaderStages::COMPUTE),
                storage_entry(2, false, wgpu::ShaderStages::COMPUTE),
                storage_entry(3, false, wgpu::ShaderStages::COMPUTE),
            ],
        });
        let read_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("ClusterReadLayout"),
            entries: &[
                storage_entry(0, true, wgpu::ShaderStages::FRAGMENT),
                storage_entry(1, true, wgpu::ShaderStages::FRAGMENT),
            ],
        });

        let (aabbs, counts, indices) = Self::allocate(context, &layout)?;
        let overflow = OverflowProbe::new(device);

        let module = shaders.get("cluster")?;
        let pipeline_layout =
            pipeline_layout(device, "ClusterPipelineLayout", &[frame_layout, &compute_layout]);
        let build_pipeline =
            compute_pipeline(context, "ClusterBuildPipeline", &pipeline_layout, module, "build")
                .context(RenderError::general("creating cluster build pipeline"))?;
        let cull_pipeline =
            compute_pipeline(context, "ClusterCullPipeline", &pipeline_layout, module, "cull")
                .context(RenderError::general("creating cluster cull pipeline"))?;

        let compute_bind_group =
            Self::create_compute_bind_group(device, &compute_layout, &aabbs, &counts, &indices, &overflow);
        let read_bind_group = Self::create_read_bind_group(device, &read_layout, &counts, &indices);

        log::info!(
            "Cluster grid {}x{}x{} ({} clusters, {} lights each)",
            layout.dims.x,
            layout.dims.y,
            layout.dims.z,
            layout.cluster_count(),
            layout.max_lights
        );

        Ok(Self {
            layout,
            aabbs,
            counts,
            indices,
            overflow,
            read_layout,
            compute_bind_group,
            read_bind_group,
            build_pipeline,
            cull_pipeline,
            built_for: None,
        })
    }

    fn allocate(
        context: &RenderContext,
        layout: &ClusterLayout,
    ) -> Result<(wgpu::Buffer, wgpu::Buffer, wgpu::Buffer), RenderError> {
        let clusters = layout.cluster_count() as u64;
        let sizes = [
            ("ClusterAabbs", clusters * mem::size_of::<ClusterAabb>() as u64),
            ("ClusterLightCounts", clusters * 4),
            ("ClusterLightIndices", clusters * layout.max_lights as u64 * 4),
        ];
        let limit = context.device.limits().max_storage_buffer_binding_size as u64;
        if let Some((label, size)) = sizes.iter().find(|(_, size)| *size > limit) {
            return Err(RenderError::NoMemory(format!(
                "{label} needs {size} bytes, storage binding limit is {limit}"
            )));
        }

        let create = |label: &str, size: u64| {
            context.scoped(GraphicsErrorCode::OutOfMemory, label, |device| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(label),
                    size,
                    usage: wgpu::BufferUsages::STORAGE,
                    mapped_at_creation: false,
                })
            })
        };
        Ok((
            create(sizes[0].0, sizes[0].1)?,
            create(sizes[1].0, sizes[1].1)?,
            create(sizes[2].0, sizes[2].1)?,
        ))
    }

    fn create_compute_bind_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        aabbs: &wgpu::Buffer,
        counts: &wgpu::Buffer,
        indices: &wgpu::Buffer,
        overflow: &OverflowProbe,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("ClusterComputeBindGroup"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: aabbs.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: counts.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: indices.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: overflow.counter().as_entire_binding(),
                },
            ],
        })
    }

    fn create_read_bind_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        counts: &wgpu::Buffer,
        indices: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("ClusterReadBindGroup"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: counts.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: indices.as_entire_binding(),
                },
            ],
        })
    }

    /// New framebuffer size or clip planes. Buffers depend only on the grid
    /// dimensions and light cap, so only the AABB cache is invalidated.
    pub fn resize(&mut self, layout: ClusterLayout) -> Result<(), RenderError> {
        layout.validate()?;
        if layout.dims != self.layout.dims || layout.max_lights != self.layout.max_lights {
            return Err(RenderError::logic(
                "cluster grid dimensions are fixed after initialisation",
            ));
        }
        self.layout = layout;
        self.built_for = None;
        Ok(())
    }

    pub fn layout(&self) -> &ClusterLayout {
        &self.layout
    }

    pub fn read_layout(&self) -> &wgpu::BindGroupLayout {
        &self.read_layout
    }

    pub fn read_bind_group(&self) -> &wgpu::BindGroup {
        &self.read_bind_group
    }

    pub fn needs_build(&self, inverse_proj: Mat4) -> bool {
        self.built_for != Some(BuildKey::new(&self.layout, inverse_proj))
    }

    fn workgroups(&self) -> u32 {
        self.layout.cluster_count().div_ceil(WORKGROUP_SIZE)
    }

    /// Records the (cached) build and the per-frame cull, then queues the
    /// overflow counter copy when no readback is outstanding.
    pub fn dispatch(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        frame_bind_group: &wgpu::BindGroup,
        inverse_proj: Mat4,
    ) {
        if self.needs_build(inverse_proj) {
            log::debug!(
                "Rebuilding cluster AABBs for {}x{}",
                self.layout.screen.x,
                self.layout.screen.y
            );
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("ClusterBuildPass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.build_pipeline);
                pass.set_bind_group(0, frame_bind_group, &[]);
                pass.set_bind_group(1, &self.compute_bind_group, &[]);
                pass.dispatch_workgroups(self.workgroups(), 1, 1);
            }
            self.built_for = Some(BuildKey::new(&self.layout, inverse_proj));
        }

        encoder.clear_buffer(self.overflow.counter(), 0, None);
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("ClusterCullPass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.cull_pipeline);
            pass.set_bind_group(0, frame_bind_group, &[]);
            pass.set_bind_group(1, &self.compute_bind_group, &[]);
            pass.dispatch_workgroups(self.workgroups(), 1, 1);
        }

        self.overflow.record_copy(encoder);
    }

    /// Call once the frame's commands were submitted.
    pub fn after_submit(&mut self) {
        self.overflow.begin_map();
    }

    /// Non-blocking; logs when clusters start or stop dropping lights.
    pub fn poll_overflow(&mut self, device: &wgpu::Device) {
        self.overflow.poll(device, self.layout.max_lights);
    }

    pub fn release(self) {
        self.aabbs.destroy();
        self.counts.destroy();
        self.indices.destroy();
        self.overflow.release();
    }
}

fn storage_entry(
    binding: u32,
    read_only: bool,
    visibility: wgpu::ShaderStages,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}
