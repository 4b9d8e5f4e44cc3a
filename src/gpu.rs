use bytemuck::{Pod, Zeroable};
use thiserror::Error;

use crate::body::Body;
use crate::octree::Node;
use crate::G;

/// Which accelerate kernel to run.
#[repr(i32)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    /// Direct double summation, the correctness oracle.
    N2 = 0,
    /// Threaded Barnes-Hut traversal over the uploaded node array.
    #[default]
    NLogN = 1,
}

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("no compatible gpu adapter found")]
    AdapterNotFound,
    #[error("failed to create gpu device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
    #[error("gpu buffer map failed: {0}")]
    MapFailed(#[from] wgpu::BufferAsyncError),
    #[error("gpu device lost during read-back")]
    DeviceLost,
}

/// Push-constant block shared by both kernels. Field order matches the
/// `PushConstants` struct in the shaders.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct PushConstants {
    dt: f32,
    theta: f32,
    g: f32,
    num_bodies: i32,
    num_nodes: i32,
    mode: i32,
}

/// A grow-only storage buffer. Reallocation invalidates bind groups, which
/// the owner rebuilds; the buffer never shrinks.
#[derive(Debug)]
struct StorageBuffer {
    label: &'static str,
    usage: wgpu::BufferUsages,
    buffer: Option<wgpu::Buffer>,
    capacity: u64,
}

impl StorageBuffer {
    fn new(label: &'static str, usage: wgpu::BufferUsages) -> Self {
        Self {
            label,
            usage,
            buffer: None,
            capacity: 0,
        }
    }

    /// Make sure at least `size` bytes are allocated. Returns whether the
    /// underlying buffer was replaced.
    fn ensure(&mut self, device: &wgpu::Device, size: u64) -> bool {
        if size == 0 || (self.buffer.is_some() && size <= self.capacity) {
            return false;
        }
        self.capacity = self.capacity.max(size);
        tracing::debug!(label = self.label, bytes = self.capacity, "gpu buffer grown");
        self.buffer = Some(device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(self.label),
            size: self.capacity,
            usage: self.usage,
            mapped_at_creation: false,
        }));
        true
    }
}

/// The compute backend: mirrors the CPU accelerate/integrate kernels on the
/// GPU against the same body and node layouts.
///
/// Fields own the device objects in creation order, so dropping the value
/// releases everything in reverse.
#[derive(Debug)]
pub struct Gpu {
    device: wgpu::Device,
    queue: wgpu::Queue,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_integrate: wgpu::ComputePipeline,
    pipeline_accelerate: wgpu::ComputePipeline,
    buffer_bodies: StorageBuffer,
    buffer_nodes: StorageBuffer,
    buffer_readback: StorageBuffer,
    bind_group: Option<wgpu::BindGroup>,
    push: PushConstants,
}

impl Gpu {
    pub fn new() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::default();
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            compatible_surface: None,
        }))
        .ok_or(GpuError::AdapterNotFound)?;
        tracing::info!(adapter = %adapter.get_info().name, "gpu backend initialized");

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("nbody"),
                required_features: wgpu::Features::PUSH_CONSTANTS,
                // Adapter limits, so the node buffer can grow past the
                // conservative default storage-binding cap at high body counts.
                required_limits: wgpu::Limits {
                    max_push_constant_size: std::mem::size_of::<PushConstants>() as u32,
                    ..adapter.limits()
                },
                memory_hints: wgpu::MemoryHints::default(),
            },
            None,
        ))?;

        let shader_integrate = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("integrate"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/integrate.wgsl").into()),
        });
        let shader_accelerate = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("accelerate"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/accelerate.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("nbody bind group layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("nbody pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[wgpu::PushConstantRange {
                stages: wgpu::ShaderStages::COMPUTE,
                range: 0..std::mem::size_of::<PushConstants>() as u32,
            }],
        });

        let make_pipeline = |label, module| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                module,
                entry_point: "main",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            })
        };
        let pipeline_integrate = make_pipeline("integrate", &shader_integrate);
        let pipeline_accelerate = make_pipeline("accelerate", &shader_accelerate);

        Ok(Self {
            device,
            queue,
            bind_group_layout,
            pipeline_integrate,
            pipeline_accelerate,
            buffer_bodies: StorageBuffer::new(
                "bodies",
                wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
            ),
            buffer_nodes: StorageBuffer::new(
                "nodes",
                wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            ),
            buffer_readback: StorageBuffer::new(
                "readback",
                wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            ),
            bind_group: None,
            push: PushConstants {
                dt: 0.0,
                theta: 0.0,
                g: G,
                num_bodies: 0,
                num_nodes: 0,
                mode: Mode::NLogN as i32,
            },
        })
    }

    /// Upload bodies and tree nodes into the storage buffers, growing them
    /// as needed and re-wiring the bind group after a reallocation.
    pub fn write(&mut self, bodies: &[Body], nodes: &[Node]) {
        let bodies_size = std::mem::size_of_val(bodies) as u64;
        let nodes_size = std::mem::size_of_val(nodes) as u64;

        let grew = self.buffer_bodies.ensure(&self.device, bodies_size)
            | self.buffer_nodes.ensure(&self.device, nodes_size);

        if grew || self.bind_group.is_none() {
            self.bind_group = match (&self.buffer_bodies.buffer, &self.buffer_nodes.buffer) {
                (Some(bodies_buf), Some(nodes_buf)) => {
                    Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some("nbody bind group"),
                        layout: &self.bind_group_layout,
                        entries: &[
                            wgpu::BindGroupEntry {
                                binding: 0,
                                resource: bodies_buf.as_entire_binding(),
                            },
                            wgpu::BindGroupEntry {
                                binding: 1,
                                resource: nodes_buf.as_entire_binding(),
                            },
                        ],
                    }))
                }
                _ => None,
            };
        }

        if let Some(buffer) = &self.buffer_bodies.buffer {
            if !bodies.is_empty() {
                self.queue.write_buffer(buffer, 0, bytemuck::cast_slice(bodies));
            }
        }
        if let Some(buffer) = &self.buffer_nodes.buffer {
            if !nodes.is_empty() {
                self.queue.write_buffer(buffer, 0, bytemuck::cast_slice(nodes));
            }
        }

        self.push.num_bodies = bodies.len() as i32;
        self.push.num_nodes = nodes.len() as i32;
    }

    /// Copy the body buffer back to the host through the read-back staging
    /// buffer, waiting on the fence before the copy out.
    pub fn read(&mut self, bodies: &mut [Body]) -> Result<(), GpuError> {
        let size = std::mem::size_of_val(bodies) as u64;
        let Some(source) = &self.buffer_bodies.buffer else {
            return Ok(());
        };
        if size == 0 {
            return Ok(());
        }
        self.buffer_readback.ensure(&self.device, size);
        let staging = self
            .buffer_readback
            .buffer
            .as_ref()
            .ok_or(GpuError::DeviceLost)?;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("read-back"),
            });
        encoder.copy_buffer_to_buffer(source, 0, staging, 0, size);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..size);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        receiver.recv().map_err(|_| GpuError::DeviceLost)??;

        bodies.copy_from_slice(bytemuck::cast_slice(&slice.get_mapped_range()));
        staging.unmap();
        Ok(())
    }

    /// Run the accelerate kernel over the uploaded bodies and nodes.
    pub fn accelerate(&mut self, theta: f32, mode: Mode) -> Result<(), GpuError> {
        self.push.theta = theta;
        self.push.mode = mode as i32;
        self.dispatch(&self.pipeline_accelerate)
    }

    /// Run the integrate kernel over the uploaded bodies.
    pub fn integrate(&mut self, dt: f32) -> Result<(), GpuError> {
        self.push.dt = dt;
        self.dispatch(&self.pipeline_integrate)
    }

    /// Record, submit and fence one kernel dispatch.
    fn dispatch(&self, pipeline: &wgpu::ComputePipeline) -> Result<(), GpuError> {
        let Some(bind_group) = &self.bind_group else {
            return Ok(());
        };
        if self.push.num_bodies == 0 {
            return Ok(());
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("dispatch"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("nbody"),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.set_push_constants(0, bytemuck::bytes_of(&self.push));
            let groups = (self.push.num_bodies as u32).div_ceil(256);
            pass.dispatch_workgroups(groups, 1, 1);
        }
        self.queue.submit(Some(encoder.finish()));
        let _ = self.device.poll(wgpu::Maintain::Wait);
        Ok(())
    }
}
