// gpu/mod.rs — wgpu kernel layer.
//
// Each kernel here mirrors a CPU reference implementation in the parent
// crate; the CPU path stays authoritative and every GPU kernel is
// validated against it in tests.
//
//   device     — adapter directory, selection policy, workgroup limits
//   reduce     — tiled multi-pass sum reduction (the interesting kernel:
//                cooperative workgroup staging + barriers)
//   mandelbrot — embarrassingly parallel escape-time grid render
//
// The host blocks on every kernel launch and readback; one launch is in
// flight at a time per call chain, so no cross-launch coordination
// exists anywhere in this layer.

pub mod device;
pub mod mandelbrot;
pub mod reduce;
