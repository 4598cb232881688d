// gpu/reduce.rs — tiled multi-pass GPU sum reduction.
//
// Pass structure (mirrored by reduce.rs::tiled_sum_reference):
//
//   while the current length L divides evenly by the tile size TS:
//     dispatch L/TS workgroups of reduce.wgsl — each stages one tile
//     into workgroup scratch, barriers, tree-reduces it, and lane 0
//     writes the tile total;
//     the output becomes the new input, L becomes L/TS.
//   copy the remaining L elements back to the host and sum serially.
//
// L strictly shrinks every pass, so the loop runs O(log_TS N) times.
//
// BUFFER PING-PONG
// ─────────────────
// Two storage buffers: one input-sized, one sized L/TS (the largest any
// pass ever writes). Two bind groups — a→b and b→a — are created once
// and the passes alternate between them. All passes go into a single
// command encoder: dispatches in one queue submission are ordered, which
// is exactly the pass-k → pass-k+1 dependency; within a pass, tiles are
// free to interleave arbitrarily.
//
// ERROR CHANNEL
// ──────────────
// Device-side validation failures are trapped with an error scope around
// the submission and surfaced as GpuError::Launch; resource limits are
// checked against the device before anything is allocated. The call
// fails with an Err — it never takes down the host process — and the
// caller's grid of options includes falling back to the CPU reference.

use wgpu::util::DeviceExt;

use crate::gpu::device::{GpuDevice, GpuError};
use crate::reduce::{pass_plan, serial_sum, TileSize, TileSizeError};

/// Multi-pass tiled sum reduction engine.
///
/// Create once per tile size (shader compilation is the expensive
/// part); call [`sum`](GpuReducer::sum) per sequence.
pub struct GpuReducer {
    pipeline: wgpu::ComputePipeline,
    bgl: wgpu::BindGroupLayout,
    tile_size: TileSize,
}

impl GpuReducer {
    /// Compile the reduction pipeline for the given tile size.
    ///
    /// The tile size is re-validated against the device's workgroup
    /// limits — `TileSize` guarantees a power of two in 2..=1024, but a
    /// particular device may cap workgroups lower.
    pub fn new(gpu: &GpuDevice, tile_size: TileSize) -> Result<Self, GpuError> {
        let ts = tile_size.get();
        if ts > gpu.limits.max_compute_workgroup_size_x
            || ts > gpu.limits.max_compute_invocations_per_workgroup
        {
            return Err(GpuError::TileSize(TileSizeError::OutOfRange(ts)));
        }

        let shader_template = include_str!("../shaders/reduce.wgsl");
        let shader_src = shader_template.replace("{{TS}}", &ts.to_string());

        let shader = gpu.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("reduce.wgsl"),
            source: wgpu::ShaderSource::Wgsl(shader_src.into()),
        });

        let bgl = gpu.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("GpuReducer BGL"),
            entries: &[
                // 0 — current sequence (storage read)
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // 1 — tile totals (storage read_write)
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout =
            gpu.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("GpuReducer pipeline layout"),
                bind_group_layouts: &[&bgl],
                push_constant_ranges: &[],
            });

        let pipeline =
            gpu.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("reduce_pass"),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: "reduce_pass",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });

        Ok(GpuReducer { pipeline, bgl, tile_size })
    }

    pub fn tile_size(&self) -> TileSize {
        self.tile_size
    }

    /// Sum a sequence on the accelerator.
    ///
    /// Matches `reduce::tiled_sum_reference` exactly — same additions in
    /// the same order — and `reduce::serial_sum` within a tolerance
    /// proportional to the input length (the tiled passes re-associate).
    ///
    /// # Panics
    /// Panics if `values` is empty; the contract requires N ≥ 1.
    ///
    /// # Errors
    /// Buffer or dispatch limits exceeded, or a device-side launch
    /// failure. The caller's data is untouched either way.
    pub fn sum(&self, gpu: &GpuDevice, values: &[f32]) -> Result<f32, GpuError> {
        assert!(!values.is_empty(), "reduction input must contain at least one element");

        let n = values.len();
        let ts = self.tile_size.as_usize();
        let plan = pass_plan(n, self.tile_size);

        // Resource-limit checks before any allocation.
        let bytes = (n * std::mem::size_of::<f32>()) as u64;
        let max_bytes = gpu.limits.max_storage_buffer_binding_size as u64;
        if bytes > max_bytes {
            return Err(GpuError::BufferTooLarge { bytes, max: max_bytes });
        }
        if plan.passes > 0 {
            let first_pass_groups = (n / ts) as u32;
            let max_groups = gpu.limits.max_compute_workgroups_per_dimension;
            if first_pass_groups > max_groups {
                return Err(GpuError::DispatchTooLarge {
                    workgroups: first_pass_groups,
                    max: max_groups,
                });
            }
        }

        // Ping-pong buffers. buf_a carries the input; buf_b is sized for
        // the largest output any pass produces (n/ts, or 1 when the
        // loop never runs and only buf_a is ever read).
        let buf_a = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("GpuReducer seq A"),
            contents: bytemuck::cast_slice(values),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        });
        let b_len = (n / ts).max(1);
        let buf_b = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("GpuReducer seq B"),
            size: (b_len * std::mem::size_of::<f32>()) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let bg_ab = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("GpuReducer BG a→b"),
            layout: &self.bgl,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: buf_a.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: buf_b.as_entire_binding() },
            ],
        });
        let bg_ba = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("GpuReducer BG b→a"),
            layout: &self.bgl,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: buf_b.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: buf_a.as_entire_binding() },
            ],
        });

        // Readback buffer for the remainder the host finishes.
        let remainder_bytes = (plan.remainder * std::mem::size_of::<f32>()) as u64;
        let rb = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("GpuReducer readback"),
            size: remainder_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        // Trap device-side validation errors for this launch.
        gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let mut encoder = gpu.device.create_command_encoder(
            &wgpu::CommandEncoderDescriptor { label: Some("GpuReducer") },
        );

        let mut len = n;
        for pass in 0..plan.passes {
            let groups = (len / ts) as u32;
            let bind_group = if pass % 2 == 0 { &bg_ab } else { &bg_ba };
            {
                let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("reduce_pass"),
                    timestamp_writes: None,
                });
                cpass.set_pipeline(&self.pipeline);
                cpass.set_bind_group(0, bind_group, &[]);
                cpass.dispatch_workgroups(groups, 1, 1);
            }
            len /= ts;
        }
        debug_assert_eq!(len, plan.remainder);

        // After an even number of passes the current sequence sits in
        // buf_a, after an odd number in buf_b.
        let final_buf = if plan.passes % 2 == 0 { &buf_a } else { &buf_b };
        encoder.copy_buffer_to_buffer(final_buf, 0, &rb, 0, remainder_bytes);
        gpu.queue.submit(std::iter::once(encoder.finish()));

        if let Some(err) = pollster::block_on(gpu.device.pop_error_scope()) {
            return Err(GpuError::Launch(err.to_string()));
        }

        // Map the remainder and finish on the host, left to right.
        let slice = rb.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            tx.send(r).expect("readback channel closed");
        });
        gpu.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .expect("readback map callback never fired")
            .map_err(|e| GpuError::Launch(format!("readback map failed: {e}")))?;

        let mapped = slice.get_mapped_range();
        let remainder: &[f32] = bytemuck::cast_slice(&mapped);
        let total = serial_sum(remainder);
        drop(mapped);
        rb.unmap();

        Ok(total)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
