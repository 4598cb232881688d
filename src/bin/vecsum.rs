// bin/vecsum.rs — tiled GPU vector sum with host verification.
//
// Builds a 2^20-element sequence, prints the accelerator directory,
// runs the tiled reduction on the GPU, and verifies the result against
// a serial host sum within a length-proportional tolerance.
//
// USAGE
//   cargo run --bin vecsum
//
// With TS = 32 the 2^20 sequence reduces in exactly four passes
// (32^4 = 2^20) before the single remaining element is read back.
// Without a usable accelerator the program degrades to the host sum
// and says so.

use std::process::ExitCode;
use std::time::Instant;

use tidal::gpu::device::GpuDevice;
use tidal::gpu::reduce::GpuReducer;
use tidal::reduce::{pass_plan, serial_sum, TileSize};

const SIZE: usize = 1 << 20;

fn main() -> ExitCode {
    // Element range is (0 – 0.15) to avoid overflow or underflow.
    let source: Vec<f32> = (0..SIZE).map(|i| ((i & 0xf) as f32) * 0.01).collect();

    let accelerators = GpuDevice::enumerate();
    if accelerators.is_empty() {
        println!("No compatible accelerators found");
    } else {
        println!("Accelerators found:");
        for info in &accelerators {
            println!("{info}");
        }
    }

    let start = Instant::now();
    let expected = serial_sum(&source);
    let serial_ms = start.elapsed().as_secs_f64() * 1000.0;
    println!("Serial sum of {SIZE} elements = {expected:.4} ({serial_ms:.2} ms)");

    let gpu = match GpuDevice::new() {
        Ok(gpu) => gpu,
        Err(e) => {
            eprintln!("[tidal] no accelerator available ({e}); host sum stands");
            return ExitCode::SUCCESS;
        }
    };

    let tile_size = TileSize::default();
    let plan = pass_plan(SIZE, tile_size);
    println!(
        "Tiled reduction: TS={tile_size}, {} pass(es), remainder {}",
        plan.passes, plan.remainder
    );

    let reducer = match GpuReducer::new(&gpu, tile_size) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("[tidal] reducer setup failed ({e}); host sum stands");
            return ExitCode::SUCCESS;
        }
    };

    let start = Instant::now();
    let total = match reducer.sum(&gpu, &source) {
        Ok(total) => total,
        Err(e) => {
            eprintln!("[tidal] reduction failed ({e}); host sum stands");
            return ExitCode::SUCCESS;
        }
    };
    let gpu_ms = start.elapsed().as_secs_f64() * 1000.0;
    println!("Tiled sum  of {SIZE} elements = {total:.4} ({gpu_ms:.2} ms)");

    // The tiled result re-associates the additions, so compare with a
    // tolerance proportional to the element count.
    let tolerance = SIZE as f32 * f32::EPSILON * expected.abs().max(1.0);
    let difference = (total - expected).abs();
    if difference <= tolerance {
        println!("VERIFIED (|Δ| = {difference:.6} ≤ {tolerance:.6})");
        ExitCode::SUCCESS
    } else {
        eprintln!("MISMATCH: |Δ| = {difference:.6} > {tolerance:.6}");
        ExitCode::FAILURE
    }
}
