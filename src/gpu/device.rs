// gpu/device.rs — accelerator directory and wgpu device abstraction.
//
// Responsibilities:
//   - Enumerate Vulkan adapters and report their capabilities
//     (`GpuDevice::enumerate` / `AcceleratorInfo`).
//   - Designate one adapter as active, either by policy (first real GPU,
//     then anything) or explicitly by enumeration index.
//   - Expose `WorkgroupSize` — the 2-D workgroup configuration used by
//     the grid-render pipeline, validated against device limits.
//
// ADAPTER SELECTION:
// wgpu's default `request_adapter` uses power preference heuristics that
// may grab llvmpipe/softpipe on WSL2 (where the software renderer appears
// as a valid Vulkan device). We enumerate explicitly and prefer anything
// that is not DeviceType::Cpu, falling back to software renderers only
// when nothing else exists — a software adapter still runs every kernel,
// just slowly, and `AcceleratorInfo::is_software` reports the situation.
//
// ERROR CHANNEL:
// Everything here returns Result<_, GpuError>. "No adapters at all" is a
// reportable, recoverable condition — callers are expected to fall back
// to the CPU reference path rather than abort.

use std::fmt;

use crate::reduce::TileSizeError;

// ---------------------------------------------------------------------------
// AcceleratorInfo
// ---------------------------------------------------------------------------

/// Capability report for one enumerated adapter.
#[derive(Debug, Clone)]
pub struct AcceleratorInfo {
    /// Position in the enumeration order; pass to
    /// [`GpuDevice::with_adapter_index`] to select this adapter.
    pub index: usize,
    pub name: String,
    pub vendor: u32,
    pub device: u32,
    pub device_type: wgpu::DeviceType,
    pub backend: wgpu::Backend,
    /// Adapter supports f64 arithmetic in shaders (SHADER_F64).
    pub supports_f64: bool,
    /// Software rasteriser / emulated device (llvmpipe and friends).
    pub is_software: bool,
    /// Largest single storage-buffer binding the adapter accepts, in
    /// bytes. The closest thing wgpu reports to dedicated memory.
    pub max_storage_buffer_binding_size: u32,
    /// Invocation cap per workgroup; bounds the usable tile size.
    pub max_invocations: u32,
}

impl AcceleratorInfo {
    fn from_adapter(index: usize, adapter: &wgpu::Adapter) -> Self {
        let info = adapter.get_info();
        let features = adapter.features();
        let limits = adapter.limits();
        AcceleratorInfo {
            index,
            name: info.name,
            vendor: info.vendor,
            device: info.device,
            device_type: info.device_type,
            backend: info.backend,
            supports_f64: features.contains(wgpu::Features::SHADER_F64),
            is_software: info.device_type == wgpu::DeviceType::Cpu,
            max_storage_buffer_binding_size: limits.max_storage_buffer_binding_size,
            max_invocations: limits.max_compute_invocations_per_workgroup,
        }
    }
}

impl fmt::Display for AcceleratorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[{}] {} ({:?}, {:?})",
            self.index, self.name, self.backend, self.device_type)?;
        writeln!(f, "      max_storage_binding   = {:.1} MiB",
            self.max_storage_buffer_binding_size as f64 / (1024.0 * 1024.0))?;
        writeln!(f, "      max_invocations       = {}", self.max_invocations)?;
        writeln!(f, "      supports_f64          = {}", self.supports_f64)?;
        write!(f,   "      is_software           = {}", self.is_software)
    }
}

// ---------------------------------------------------------------------------
// WorkgroupSize
// ---------------------------------------------------------------------------

/// A workgroup size configuration for 2-D compute dispatches.
///
/// The invocation total `x * y` must stay within the device's
/// `max_compute_invocations_per_workgroup`; use
/// [`GpuDevice::set_workgroup_size`] to override the default with
/// validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkgroupSize {
    pub x: u32,
    pub y: u32,
}

impl WorkgroupSize {
    /// Default for the 2-D grid kernel: 16×8 = 128 invocations — four
    /// NVIDIA warps, two AMD wavefronts, and a 16-wide x dimension that
    /// matches row-major cell rows.
    pub const DEFAULT: WorkgroupSize = WorkgroupSize { x: 16, y: 8 };

    /// Total invocations per workgroup (x * y).
    pub fn total(&self) -> u32 {
        self.x * self.y
    }
}

impl fmt::Display for WorkgroupSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{} ({} invocations)", self.x, self.y, self.total())
    }
}

// ---------------------------------------------------------------------------
// GpuDevice
// ---------------------------------------------------------------------------

/// The active accelerator: adapter, device, queue.
///
/// Create via [`GpuDevice::new`] (policy selection) or
/// [`GpuDevice::with_adapter_index`] (explicit). Hold one `GpuDevice`
/// for the lifetime of the application — Vulkan instance + device
/// initialisation is expensive.
///
/// # Field drop order
/// Rust drops struct fields in declaration order. `_instance` is
/// declared last so the `wgpu::Instance` outlives `device` and `queue`;
/// dzn (the D3D12-to-Vulkan layer on WSL2) crashes when the instance
/// dies while device-level objects still reference it.
pub struct GpuDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: AcceleratorInfo,
    pub workgroup_size: WorkgroupSize,
    /// The limits the device was created with; kernels validate buffer
    /// and dispatch sizes against these before launching.
    pub limits: wgpu::Limits,
    /// Keeps the `wgpu::Instance` alive until `device` and `queue` are
    /// dropped. Never accessed; exists to control drop order.
    _instance: wgpu::Instance,
}

fn create_instance() -> wgpu::Instance {
    // Vulkan only — no DX12, no Metal, no WebGPU. dzn on WSL2 declares
    // itself non-conformant and wgpu would drop it without the
    // ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER flag; our kernels are
    // compute-only and need none of the conformance-required rendering
    // behaviour.
    let flags = if cfg!(debug_assertions) {
        wgpu::InstanceFlags::VALIDATION
            | wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
    } else {
        wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
    };
    wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::VULKAN,
        flags,
        ..Default::default()
    })
}

impl GpuDevice {
    /// List every Vulkan adapter with its capability report.
    ///
    /// Returns an empty vector when no adapter exists — a degraded
    /// condition, not an error; callers decide whether to fall back.
    pub fn enumerate() -> Vec<AcceleratorInfo> {
        let instance = create_instance();
        instance
            .enumerate_adapters(wgpu::Backends::VULKAN)
            .iter()
            .enumerate()
            .map(|(i, a)| AcceleratorInfo::from_adapter(i, a))
            .collect()
    }

    /// Create a `GpuDevice` by policy: prefer real hardware
    /// (discrete/integrated/virtual/other), take a software adapter
    /// only as a last resort.
    pub fn new() -> Result<Self, GpuError> {
        pollster::block_on(Self::init_async(AdapterChoice::Policy, wgpu::Features::empty()))
    }

    /// Create a `GpuDevice` from an explicit enumeration index, as
    /// reported by [`GpuDevice::enumerate`].
    pub fn with_adapter_index(index: usize) -> Result<Self, GpuError> {
        pollster::block_on(Self::init_async(AdapterChoice::Index(index), wgpu::Features::empty()))
    }

    /// Policy selection with extra required features (e.g.
    /// `wgpu::Features::SHADER_F64`). Fails with
    /// [`GpuError::MissingFeatures`] when the chosen adapter lacks any
    /// of them — the capability-mismatch case, reported up front instead
    /// of crashing at dispatch time.
    pub fn with_features(features: wgpu::Features) -> Result<Self, GpuError> {
        pollster::block_on(Self::init_async(AdapterChoice::Policy, features))
    }

    async fn init_async(choice: AdapterChoice, features: wgpu::Features) -> Result<Self, GpuError> {
        let instance = create_instance();
        let adapters: Vec<wgpu::Adapter> = instance.enumerate_adapters(wgpu::Backends::VULKAN);

        if adapters.is_empty() {
            return Err(GpuError::NoSuitableAdapter);
        }

        for (i, a) in adapters.iter().enumerate() {
            let info = a.get_info();
            eprintln!("[tidal] Vulkan adapter {i}: {} ({:?}, {:?})",
                info.name, info.backend, info.device_type);
        }

        let count = adapters.len();
        let (index, adapter) = match choice {
            AdapterChoice::Index(index) => {
                if index >= count {
                    return Err(GpuError::AdapterIndexOutOfRange { index, count });
                }
                (index, adapters.into_iter().nth(index).unwrap())
            }
            AdapterChoice::Policy => {
                // Tier 1: real hardware (or a VM/dzn layer in front of
                // it). Tier 2: whatever exists, software included.
                let picked = adapters
                    .iter()
                    .position(|a| a.get_info().device_type != wgpu::DeviceType::Cpu)
                    .unwrap_or(0);
                (picked, adapters.into_iter().nth(picked).unwrap())
            }
        };

        let adapter_info = AcceleratorInfo::from_adapter(index, &adapter);
        eprintln!("[tidal] selected adapter {index}: {}", adapter_info.name);

        if !adapter.features().contains(features) {
            return Err(GpuError::MissingFeatures(features - adapter.features()));
        }

        let limits = wgpu::Limits::default();
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("tidal"),
                    required_features: features,
                    required_limits: limits.clone(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(GpuError::DeviceRequest)?;

        Ok(GpuDevice {
            device,
            queue,
            adapter_info,
            workgroup_size: WorkgroupSize::DEFAULT,
            limits,
            _instance: instance,
        })
    }

    /// Override the 2-D workgroup size, validating the invocation total
    /// against the device limit.
    pub fn set_workgroup_size(&mut self, x: u32, y: u32) -> Result<(), GpuError> {
        let total = x * y;
        let max = self.limits.max_compute_invocations_per_workgroup;
        if x == 0 || y == 0 || total > max {
            return Err(GpuError::WorkgroupTooLarge { total, max });
        }
        self.workgroup_size = WorkgroupSize { x, y };
        Ok(())
    }

    /// Workgroup counts needed to cover a `cells_x` × `cells_y` domain
    /// with the active workgroup size, by ceiling division. The shader
    /// guards the overshoot:
    /// ```wgsl
    /// if gid.x >= width || gid.y >= height { return; }
    /// ```
    pub fn dispatch_size(&self, cells_x: u32, cells_y: u32) -> (u32, u32) {
        let dx = (cells_x + self.workgroup_size.x - 1) / self.workgroup_size.x;
        let dy = (cells_y + self.workgroup_size.y - 1) / self.workgroup_size.y;
        (dx, dy)
    }
}

impl fmt::Display for GpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GpuDevice {{ adapter: {} ({:?}), workgroup: {} }}",
            self.adapter_info.name, self.adapter_info.device_type, self.workgroup_size
        )
    }
}

#[derive(Clone, Copy)]
enum AdapterChoice {
    Policy,
    Index(usize),
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from device initialisation, configuration, and kernel launch.
#[derive(Debug)]
pub enum GpuError {
    /// No Vulkan adapter found at all. On WSL2: check that Vulkan is
    /// installed and `vulkaninfo` shows a device.
    NoSuitableAdapter,
    /// Explicit adapter index past the end of the enumeration.
    AdapterIndexOutOfRange { index: usize, count: usize },
    /// wgpu device request failed (driver issue, unsupported limits…).
    DeviceRequest(wgpu::RequestDeviceError),
    /// The adapter lacks features the caller required (the listed set
    /// is the missing part).
    MissingFeatures(wgpu::Features),
    /// Requested workgroup size exceeds the device's invocation limit.
    WorkgroupTooLarge { total: u32, max: u32 },
    /// Tile size rejected (not a power of two / out of range / over the
    /// device's workgroup dimension limit).
    TileSize(TileSizeError),
    /// Input does not fit in a single storage-buffer binding.
    BufferTooLarge { bytes: u64, max: u64 },
    /// A pass would need more workgroups than one dispatch dimension
    /// allows.
    DispatchTooLarge { workgroups: u32, max: u32 },
    /// The device reported a validation error while executing the
    /// launch (captured via an error scope).
    Launch(String),
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::NoSuitableAdapter => write!(
                f,
                "no Vulkan adapter found. On WSL2: ensure Vulkan is installed \
                 and `vulkaninfo` lists a device."
            ),
            GpuError::AdapterIndexOutOfRange { index, count } => write!(
                f,
                "adapter index {index} out of range ({count} adapter(s) enumerated)"
            ),
            GpuError::DeviceRequest(e) => write!(f, "device request failed: {e}"),
            GpuError::MissingFeatures(missing) => write!(
                f,
                "adapter lacks required features: {missing:?}"
            ),
            GpuError::WorkgroupTooLarge { total, max } => write!(
                f,
                "workgroup size {total} exceeds device limit of {max} invocations"
            ),
            GpuError::TileSize(e) => write!(f, "{e}"),
            GpuError::BufferTooLarge { bytes, max } => write!(
                f,
                "sequence needs a {bytes}-byte buffer; device caps storage \
                 bindings at {max} bytes"
            ),
            GpuError::DispatchTooLarge { workgroups, max } => write!(
                f,
                "pass needs {workgroups} workgroups; device caps one dispatch \
                 dimension at {max}"
            ),
            GpuError::Launch(msg) => write!(f, "kernel launch failed: {msg}"),
        }
    }
}

impl std::error::Error for GpuError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GpuError::DeviceRequest(e) => Some(e),
            GpuError::TileSize(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TileSizeError> for GpuError {
    fn from(e: TileSizeError) -> Self {
        GpuError::TileSize(e)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // GPU-requiring tests are behind #[ignore] so `cargo test` passes in
    // CI without Vulkan; run with --include-ignored on a machine with a
    // device. Pure-arithmetic tests run everywhere.

    #[test]
    fn test_workgroup_default_total() {
        assert_eq!(WorkgroupSize::DEFAULT.total(), 128);
    }

    #[test]
    fn test_dispatch_size_exact_and_ceiling() {
        // dispatch_size is a pure function of the workgroup size; no
        // device needed to pin its arithmetic.
        struct Stub {
            workgroup_size: WorkgroupSize,
        }
        impl Stub {
            fn dispatch_size(&self, cells_x: u32, cells_y: u32) -> (u32, u32) {
                let dx = (cells_x + self.workgroup_size.x - 1) / self.workgroup_size.x;
                let dy = (cells_y + self.workgroup_size.y - 1) / self.workgroup_size.y;
                (dx, dy)
            }
        }
        let stub = Stub { workgroup_size: WorkgroupSize::DEFAULT };

        // 1920×1200 divides evenly by 16×8.
        assert_eq!(stub.dispatch_size(1920, 1200), (120, 150));
        // Non-multiples round up; the shader's bounds guard covers the
        // overshoot.
        assert_eq!(stub.dispatch_size(100, 75), (7, 10));
        assert_eq!(stub.dispatch_size(1, 1), (1, 1));
    }

    #[test]
    fn test_error_display_is_informative() {
        let e = GpuError::WorkgroupTooLarge { total: 2048, max: 256 };
        assert!(e.to_string().contains("2048"));
        let e = GpuError::AdapterIndexOutOfRange { index: 2, count: 1 };
        assert!(e.to_string().contains("index 2"));
    }

    // ---- GPU integration tests (subprocess isolation) ----------------------
    //
    // dzn on WSL2 SIGSEGVs during process exit once a Vulkan device has
    // existed in the process; the crash is in dzn's own atexit handler
    // and unrelated to our drop order. Each GPU test therefore runs in a
    // child `cargo test` process: the child prints "GPU_TEST_OK" before
    // returning and the parent asserts on the output, ignoring the exit
    // status.

    fn run_gpu_test_in_subprocess(test_name: &str) -> String {
        let output = std::process::Command::new("cargo")
            .args([
                "test", "--lib", "--",
                test_name, "--exact", "--ignored", "--nocapture",
            ])
            .output()
            .unwrap_or_else(|e| panic!("failed to spawn subprocess for {test_name}: {e}"));
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        print!("{stdout}");
        eprint!("{stderr}");
        stdout + &stderr
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_enumerate_reports_active_adapter() {
        let accelerators = GpuDevice::enumerate();
        assert!(!accelerators.is_empty(), "expected at least one adapter");
        for info in &accelerators {
            println!("{info}");
        }
        let gpu = GpuDevice::new().expect("should initialise a Vulkan device");
        println!("{gpu}");
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_with_adapter_index_selects() {
        let count = GpuDevice::enumerate().len();
        assert!(count > 0);
        let gpu = GpuDevice::with_adapter_index(0).expect("index 0 must exist");
        println!("{gpu}");
        drop(gpu);
        match GpuDevice::with_adapter_index(count + 7) {
            Err(GpuError::AdapterIndexOutOfRange { .. }) => {}
            Err(other) => panic!("unexpected error kind: {other}"),
            Ok(_) => panic!("index past the enumeration must fail"),
        }
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_set_workgroup_size_validates() {
        let mut gpu = GpuDevice::new().unwrap();
        gpu.set_workgroup_size(8, 8).expect("64 invocations is always valid");
        assert_eq!(gpu.workgroup_size, WorkgroupSize { x: 8, y: 8 });
        let max = gpu.limits.max_compute_invocations_per_workgroup;
        let err = gpu.set_workgroup_size(max, 2).unwrap_err();
        assert!(matches!(err, GpuError::WorkgroupTooLarge { .. }));
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_enumerate_reports_active_adapter() {
        let out = run_gpu_test_in_subprocess(
            "gpu::device::tests::inner_enumerate_reports_active_adapter",
        );
        assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_with_adapter_index_selects() {
        let out = run_gpu_test_in_subprocess(
            "gpu::device::tests::inner_with_adapter_index_selects",
        );
        assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_set_workgroup_size_validates() {
        let out = run_gpu_test_in_subprocess(
            "gpu::device::tests::inner_set_workgroup_size_validates",
        );
        assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
    }
}
