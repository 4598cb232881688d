// Tidal: TIled Data-pArallel Library
// GPU sum reduction and escape-time set rendering on wgpu.
//
// Every GPU kernel under gpu/ has a CPU reference implementation in the
// top-level module tree. The CPU path is the authoritative oracle; the
// GPU kernels are validated against it in tests.

pub mod grid;
pub mod mandelbrot;
pub mod reduce;
pub mod tga;

pub mod gpu;
