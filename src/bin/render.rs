// bin/render.rs — escape-time set renderer.
//
// Prints the accelerator directory, renders the detail region in 16
// horizontal bands (timing each), writes output.tga, and optionally
// shows the result in a window.
//
// USAGE
//   cargo run --bin render              # GPU render of the detail zoom
//   cargo run --bin render -- --full    # the whole set instead
//   cargo run --bin render -- --view    # also open a minifb window
//
// When no accelerator is usable, the CPU reference renderer takes over;
// a failed band launch degrades to the CPU path for that band only
// (cells are independent, so mixing paths per band is safe). An output
// file error is fatal: message + exit code 1.

use std::process::ExitCode;
use std::time::Instant;

use tidal::gpu::device::GpuDevice;
use tidal::gpu::mandelbrot::GpuMandelbrot;
use tidal::grid::Grid;
use tidal::mandelbrot::{render_region, Region, HEIGHT, MAX_ITERATIONS, WIDTH};
use tidal::tga::write_tga;

const BANDS: usize = 16;
const OUTPUT_PATH: &str = "output.tga";

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let region = if args.iter().any(|a| a == "--full") {
        Region::FULL
    } else {
        Region::DETAIL
    };
    let view = args.iter().any(|a| a == "--view");

    // Accelerator directory.
    let accelerators = GpuDevice::enumerate();
    if accelerators.is_empty() {
        println!("No compatible accelerators found");
    } else {
        println!("Accelerators found:");
        for info in &accelerators {
            println!("{info}");
        }
    }

    let gpu = match GpuDevice::new() {
        Ok(gpu) => {
            println!("Using {gpu}");
            Some(gpu)
        }
        Err(e) => {
            eprintln!("[tidal] no accelerator available ({e}); rendering on the CPU");
            None
        }
    };
    let renderer = gpu.as_ref().map(|g| GpuMandelbrot::new(g, MAX_ITERATIONS));

    println!("Rendering {WIDTH}×{HEIGHT}, {region:?}");
    let mut grid = Grid::new(WIDTH, HEIGHT);

    let band_height = HEIGHT / BANDS;
    for band in 0..BANDS {
        let rows = band_height * band..band_height * (band + 1);
        let start = Instant::now();

        match (&gpu, &renderer) {
            (Some(gpu), Some(renderer)) => {
                if let Err(e) = renderer.render_rows(gpu, &mut grid, &region, rows.clone()) {
                    eprintln!("[tidal] band {band} launch failed ({e}); using the CPU for it");
                    render_region(&mut grid, &region, rows.clone(), MAX_ITERATIONS);
                }
            }
            _ => render_region(&mut grid, &region, rows.clone(), MAX_ITERATIONS),
        }

        let ms = start.elapsed().as_secs_f64() * 1000.0;
        println!("Band {band:2} (rows {:4}..{:4}) took {ms:8.2} ms", rows.start, rows.end);
    }

    if let Err(e) = write_tga(&grid, OUTPUT_PATH) {
        eprintln!("Error writing to {OUTPUT_PATH}: {e}");
        return ExitCode::FAILURE;
    }
    println!("Wrote {OUTPUT_PATH}");

    if view {
        show_window(&grid);
    }

    ExitCode::SUCCESS
}

/// Display the grid in a minifb window until Escape or close.
fn show_window(grid: &Grid) {
    // minifb wants 0xAARRGGBB; our cells are 0x00RRGGBB.
    let fb: Vec<u32> = grid.as_slice().iter().map(|&c| 0xFF00_0000 | c).collect();

    // Scale the window down to something that fits a laptop screen.
    let (w, h) = (grid.width(), grid.height());
    let mut window = minifb::Window::new(
        &format!("tidal — {w}×{h}"),
        w,
        h,
        minifb::WindowOptions {
            resize: false,
            scale: minifb::Scale::FitScreen,
            ..Default::default()
        },
    )
    .expect("failed to open window");

    window.limit_update_rate(Some(std::time::Duration::from_millis(16)));
    eprintln!("[tidal] window open — press Escape or close to exit");

    while window.is_open() && !window.is_key_down(minifb::Key::Escape) {
        window
            .update_with_buffer(&fb, w, h)
            .expect("window update failed");
    }
}
