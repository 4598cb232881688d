// tests/test_reduce.rs — Integration tests for the reduction arithmetic.
//
// These run with `cargo test --test test_reduce`. Integration tests see
// only the crate's public API — a good check that the reduction surface
// (TileSize, pass_plan, the two sums) is usable without internals.
// GPU parity lives in the subprocess-isolated tests inside gpu::reduce.

use tidal::reduce::{
    pass_plan, serial_sum, tiled_sum_reference, PassPlan, TileSize, TileSizeError,
};

fn ts(n: u32) -> TileSize {
    TileSize::new(n).unwrap()
}

// ===== TileSize =====

#[test]
fn tile_size_validation_is_public() {
    assert!(TileSize::new(32).is_ok());
    assert_eq!(TileSize::new(48), Err(TileSizeError::NotPowerOfTwo(48)));
    assert_eq!(TileSize::new(1), Err(TileSizeError::OutOfRange(1)));
}

// ===== Pass plans across tile sizes =====

#[test]
fn pass_plan_chain_lengths() {
    // N = TS^k · r with r not divisible by TS takes exactly k passes.
    for &tile in &[2u32, 4, 8, 32] {
        let t = ts(tile);
        let ts_us = tile as usize;
        for k in 0..4usize {
            for r in [1usize, 3, ts_us + 1] {
                if r % ts_us == 0 {
                    continue;
                }
                let n = ts_us.pow(k as u32) * r;
                let plan = pass_plan(n, t);
                assert_eq!(
                    plan,
                    PassPlan { passes: k, remainder: r },
                    "n={n} ts={tile}"
                );
            }
        }
    }
}

#[test]
fn pass_plan_terminates_at_one() {
    // A pure power of the tile size collapses all the way to length 1.
    let plan = pass_plan(32usize.pow(3), ts(32));
    assert_eq!(plan, PassPlan { passes: 3, remainder: 1 });
}

// ===== Tiled reference vs serial sum =====

#[test]
fn tiled_equals_serial_on_exact_values() {
    // Small-integer values: f32 addition is exact, so reassociation
    // cannot change the result and the two sums agree bit-for-bit.
    for n in [1usize, 5, 31, 32, 33, 64, 1024, 32 * 32 * 3] {
        let values: Vec<f32> = (0..n).map(|i| ((i * 7) % 23) as f32).collect();
        assert_eq!(
            tiled_sum_reference(&values, ts(32)),
            serial_sum(&values),
            "n={n}"
        );
    }
}

#[test]
fn tiled_near_serial_on_fractional_values() {
    let values: Vec<f32> = (0..32 * 32 * 32).map(|i| ((i & 0xf) as f32) * 0.01).collect();
    let tiled = tiled_sum_reference(&values, ts(32));
    let serial = serial_sum(&values);
    let tol = values.len() as f32 * f32::EPSILON * serial.abs().max(1.0);
    assert!(
        (tiled - serial).abs() <= tol,
        "tiled={tiled} serial={serial} tol={tol}"
    );
}

#[test]
fn remainder_splits_as_prefix_plus_host_sum() {
    // When N is not TS-divisible, zero passes run: the tiled result IS
    // the serial sum. When it is divisible, the result equals the tiled
    // reduction of the partials plus nothing else — checked by summing
    // each tile separately.
    let t = ts(4);
    let values: Vec<f32> = (0..20).map(|i| i as f32).collect();

    // 20 % 4 == 0: one pass to 5 partials (each a tile sum), then
    // 5 % 4 != 0 so the 5 partials are host-summed.
    let partials: Vec<f32> = values.chunks(4).map(serial_sum).collect();
    assert_eq!(partials.len(), 5);
    assert_eq!(tiled_sum_reference(&values, t), serial_sum(&partials));
}

#[test]
fn different_tile_sizes_agree_within_tolerance() {
    let values: Vec<f32> = (0..4096).map(|i| ((i * 13) % 29) as f32 * 0.125).collect();
    let tol = values.len() as f32 * f32::EPSILON * 2048.0;
    let base = serial_sum(&values);
    for &tile in &[2u32, 8, 16, 32, 64, 256] {
        let s = tiled_sum_reference(&values, ts(tile));
        assert!((s - base).abs() <= tol, "ts={tile}: {s} vs {base}");
    }
}
