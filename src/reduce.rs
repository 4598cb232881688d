// reduce.rs — CPU reference for the tiled sum reduction.
//
// The GPU engine in gpu/reduce.rs shrinks a sequence by a factor of the
// tile size per pass, for as long as the current length divides evenly
// into tiles, then sums the remainder on the host. This module holds the
// pure arithmetic shared by both paths:
//
//   - TileSize       — runtime-validated tile size (was a compile-time
//                      constant in older designs; validation replaces the
//                      implicit power-of-two assumption)
//   - pass_plan      — how many tiled passes a length takes, and what
//                      remainder the host finishes
//   - serial_sum     — ordinary left-to-right accumulation (the host
//                      remainder path and the verification baseline)
//   - tiled_sum_reference — a CPU simulation of the full engine with the
//                      same pass structure and the same intra-tile tree
//                      reduction, used as the oracle in GPU parity tests
//
// Floating-point note: the tiled result re-associates the additions, so
// it is NOT bit-equal to serial_sum in general. Tests compare with a
// tolerance proportional to n · f32::EPSILON.

use std::fmt;

/// Default tile size. 32 lanes: one NVIDIA warp, half an AMD wavefront.
pub const DEFAULT_TILE_SIZE: u32 = 32;

/// Largest accepted tile size. WGSL workgroup dimensions are capped at
/// 1024 by every Vulkan implementation we target; the device-specific
/// limit is re-checked at pipeline creation.
pub const MAX_TILE_SIZE: u32 = 1024;

// ---------------------------------------------------------------------------
// TileSize
// ---------------------------------------------------------------------------

/// A validated tile size: the number of cooperating lanes per tile.
///
/// Must be a power of two in `2..=1024`. The power-of-two requirement is
/// what makes the intra-tile tree reduction exact: each halving step
/// pairs every active lane with one partner, so log2(TS) steps fold the
/// whole scratch buffer into slot 0.
///
/// Construct via [`TileSize::new`]; `TileSize::default()` is 32.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileSize(u32);

impl TileSize {
    /// Validate and wrap a tile size.
    pub fn new(ts: u32) -> Result<Self, TileSizeError> {
        if !ts.is_power_of_two() {
            return Err(TileSizeError::NotPowerOfTwo(ts));
        }
        if !(2..=MAX_TILE_SIZE).contains(&ts) {
            return Err(TileSizeError::OutOfRange(ts));
        }
        Ok(TileSize(ts))
    }

    #[inline]
    pub fn get(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl Default for TileSize {
    fn default() -> Self {
        TileSize(DEFAULT_TILE_SIZE)
    }
}

impl fmt::Display for TileSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rejected tile size values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileSizeError {
    /// The tree reduction requires a power-of-two lane count.
    NotPowerOfTwo(u32),
    /// Outside `2..=1024`.
    OutOfRange(u32),
}

impl fmt::Display for TileSizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileSizeError::NotPowerOfTwo(ts) => {
                write!(f, "tile size {ts} is not a power of two")
            }
            TileSizeError::OutOfRange(ts) => {
                write!(f, "tile size {ts} outside supported range 2..={MAX_TILE_SIZE}")
            }
        }
    }
}

impl std::error::Error for TileSizeError {}

// ---------------------------------------------------------------------------
// Pass plan
// ---------------------------------------------------------------------------

/// How a reduction of `n` elements unfolds for a given tile size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassPlan {
    /// Number of tiled passes (each shrinks the length by ×TS).
    pub passes: usize,
    /// Length left over for the serial host sum after the last pass.
    /// Always >= 1 for n >= 1, and never evenly divisible by TS.
    pub remainder: usize,
}

/// Compute the pass/remainder breakdown for a sequence of length `n`.
///
/// A pass runs only while the current length divides evenly into tiles;
/// the first length that does not (including any length < TS, and
/// length 1 in particular) goes to the host. The length strictly
/// shrinks every pass, so this terminates in O(log_TS n) steps.
pub fn pass_plan(n: usize, ts: TileSize) -> PassPlan {
    let ts = ts.as_usize();
    let mut len = n;
    let mut passes = 0;
    while len > 0 && len % ts == 0 {
        len /= ts;
        passes += 1;
    }
    PassPlan { passes, remainder: len }
}

// ---------------------------------------------------------------------------
// Sums
// ---------------------------------------------------------------------------

/// Ordinary left-to-right accumulation.
pub fn serial_sum(values: &[f32]) -> f32 {
    values.iter().fold(0.0f32, |acc, &v| acc + v)
}

/// CPU simulation of the tiled engine: identical pass structure and
/// identical intra-tile tree reduction as the GPU kernel, followed by a
/// serial sum of the remainder.
///
/// This is the oracle the GPU path is tested against — agreement is
/// exact (same additions in the same order), not merely within
/// tolerance.
pub fn tiled_sum_reference(values: &[f32], ts: TileSize) -> f32 {
    let tile = ts.as_usize();
    let mut current = values.to_vec();

    while !current.is_empty() && current.len() % tile == 0 {
        let mut next = Vec::with_capacity(current.len() / tile);
        for chunk in current.chunks_exact(tile) {
            let mut scratch = chunk.to_vec();
            next.push(reduce_tile(&mut scratch));
        }
        current = next;
    }

    serial_sum(&current)
}

/// Binary-tree reduction of one tile's scratch buffer, in place.
///
/// Each step: lanes with index < half add their mirrored partner's
/// value, exactly as the GPU kernel does between barriers. The scratch
/// length must be a power of two.
fn reduce_tile(scratch: &mut [f32]) -> f32 {
    debug_assert!(scratch.len().is_power_of_two());
    let mut half = scratch.len() / 2;
    while half > 0 {
        for lane in 0..half {
            scratch[lane] += scratch[lane + half];
        }
        half /= 2;
    }
    scratch[0]
}
