// gpu/mandelbrot.rs — GPU escape-time grid render.
//
// The easy kernel: one invocation per cell, no shared state, no
// synchronisation. Cells write disjoint slots, so any interleaving
// produces the identical grid.
//
// OUTPUT STRATEGY: band-sized dense buffer
// ─────────────────────────────────────────
// A render call covers a row range [row_min, row_max). The storage
// buffer holds exactly that band (rows × width u32 cells); the shader
// rebases its write index to the band. The readback is copied into the
// caller-owned Grid only after the launch has been checked for errors,
// so a failed call leaves the grid untouched.
//
// The kernel arithmetic is byte-for-byte the same recurrence and
// mapping as mandelbrot.rs — see that module for the two preserved
// quirks (cross-wired axes, component-wise squaring).

use std::ops::Range;

use wgpu::util::DeviceExt;

use crate::gpu::device::{GpuDevice, GpuError};
use crate::grid::Grid;
use crate::mandelbrot::Region;

// ---------------------------------------------------------------------------
// Uniform params (must match WGSL struct RenderParams exactly)
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct RenderParams {
    left: f32,
    right: f32,
    top: f32,
    bottom: f32,
    width: u32,
    height: u32,
    row_min: u32,
    row_max: u32,
    max_iterations: u32,
    _pad: [u32; 3],
}

// ---------------------------------------------------------------------------
// GpuMandelbrot
// ---------------------------------------------------------------------------

/// GPU escape-time renderer.
///
/// Create once (shader compilation); call [`render`](Self::render) or
/// [`render_rows`](Self::render_rows) per grid or band.
pub struct GpuMandelbrot {
    pipeline: wgpu::ComputePipeline,
    bgl: wgpu::BindGroupLayout,
    pub max_iterations: u32,
}

impl GpuMandelbrot {
    pub fn new(gpu: &GpuDevice, max_iterations: u32) -> Self {
        let shader_template = include_str!("../shaders/mandelbrot.wgsl");
        let shader_src = shader_template
            .replace("{{WG_X}}", &gpu.workgroup_size.x.to_string())
            .replace("{{WG_Y}}", &gpu.workgroup_size.y.to_string());

        let shader = gpu.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("mandelbrot.wgsl"),
            source: wgpu::ShaderSource::Wgsl(shader_src.into()),
        });

        let bgl = gpu.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("GpuMandelbrot BGL"),
            entries: &[
                // 0 — band cell buffer (storage read_write)
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
                // 1 — params uniform
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout =
            gpu.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("GpuMandelbrot pipeline layout"),
                bind_group_layouts: &[&bgl],
                push_constant_ranges: &[],
            });

        let pipeline =
            gpu.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("render_cells"),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: "render_cells",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });

        GpuMandelbrot { pipeline, bgl, max_iterations }
    }

    /// Render every row of `grid` for `region`.
    pub fn render(&self, gpu: &GpuDevice, grid: &mut Grid, region: &Region) -> Result<(), GpuError> {
        let height = grid.height();
        self.render_rows(gpu, grid, region, 0..height)
    }

    /// Render only the rows in `rows`; every other cell of `grid` is
    /// left exactly as it was. On error nothing in `grid` changes.
    ///
    /// # Panics
    /// Panics if `rows.end > grid.height()` or `rows` is empty.
    pub fn render_rows(
        &self,
        gpu: &GpuDevice,
        grid: &mut Grid,
        region: &Region,
        rows: Range<usize>,
    ) -> Result<(), GpuError> {
        assert!(rows.end <= grid.height(),
            "row range {rows:?} out of bounds for height {}", grid.height());
        assert!(!rows.is_empty(), "row range must be non-empty");

        let width = grid.width() as u32;
        let height = grid.height() as u32;
        let row_min = rows.start as u32;
        let row_max = rows.end as u32;
        let band_rows = row_max - row_min;

        let band_bytes = (band_rows as u64) * (width as u64)
            * std::mem::size_of::<u32>() as u64;
        let max_bytes = gpu.limits.max_storage_buffer_binding_size as u64;
        if band_bytes > max_bytes {
            return Err(GpuError::BufferTooLarge { bytes: band_bytes, max: max_bytes });
        }

        let cell_buf = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("GpuMandelbrot cells"),
            size: band_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let params = RenderParams {
            left: region.left as f32,
            right: region.right as f32,
            top: region.top as f32,
            bottom: region.bottom as f32,
            width,
            height,
            row_min,
            row_max,
            max_iterations: self.max_iterations,
            _pad: [0; 3],
        };
        let params_buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("GpuMandelbrot params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("GpuMandelbrot BG"),
            layout: &self.bgl,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: cell_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: params_buf.as_entire_binding() },
            ],
        });

        let rb = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("GpuMandelbrot readback"),
            size: band_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let (wg_x, wg_y) = gpu.dispatch_size(width, band_rows);
        let mut encoder = gpu.device.create_command_encoder(
            &wgpu::CommandEncoderDescriptor { label: Some("GpuMandelbrot") },
        );
        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("render_cells"),
                timestamp_writes: None,
            });
            cpass.set_pipeline(&self.pipeline);
            cpass.set_bind_group(0, &bind_group, &[]);
            cpass.dispatch_workgroups(wg_x, wg_y, 1);
        }
        encoder.copy_buffer_to_buffer(&cell_buf, 0, &rb, 0, band_bytes);
        gpu.queue.submit(std::iter::once(encoder.finish()));

        if let Some(err) = pollster::block_on(gpu.device.pop_error_scope()) {
            return Err(GpuError::Launch(err.to_string()));
        }

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
        let cells: &[u32] = bytemuck::cast_slice(&mapped);
        grid.rows_mut(rows.start, rows.end).copy_from_slice(cells);
        drop(mapped);
        rb.unmap();

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
