// tga.rs — Uncompressed 24-bit TGA serialisation of a Grid.
//
// Format: http://www.gamers.org/dEngine/quake3/TGA.txt
//
// Fixed 18-byte header (image-type 2 = uncompressed true-colour, 24 bpp,
// dimensions as little-endian u16), then HEIGHT rows of WIDTH pixels,
// each pixel 3 bytes in blue-green-red order. Rows are emitted with
// grid row 0 first.
//
// The core is generic over io::Write so tests serialise into a Vec<u8>;
// write_tga() is the buffered-file wrapper. It flushes before returning
// so any deferred stream error surfaces as the call's result rather
// than silently producing a truncated file.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::grid::Grid;

/// TGA header length in bytes.
const HEADER_LEN: usize = 18;

/// Serialise `grid` as uncompressed 24-bit TGA into `out`.
///
/// # Errors
/// `InvalidInput` if either grid dimension exceeds the format's u16
/// limit; otherwise any error of the underlying writer.
pub fn write_tga_to<W: Write>(grid: &Grid, out: &mut W) -> io::Result<()> {
    let width = grid.width();
    let height = grid.height();
    if width > u16::MAX as usize || height > u16::MAX as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("grid {width}×{height} exceeds TGA's 65535 dimension limit"),
        ));
    }

    let w = width as u16;
    let h = height as u16;
    let header: [u8; HEADER_LEN] = [
        0,                             // no image ID
        0,                             // no colour map
        2,                             // uncompressed 24-bit image
        0, 0, 0, 0, 0,                 // empty colour map specification
        0, 0,                          // X origin
        0, 0,                          // Y origin
        (w & 0xFF) as u8, (w >> 8) as u8, // width, little-endian
        (h & 0xFF) as u8, (h >> 8) as u8, // height, little-endian
        24,                            // bits per pixel
        0,                             // image descriptor
    ];
    out.write_all(&header)?;

    // One row buffer, reused: 3 bytes per cell, B-G-R.
    let mut row_bytes = vec![0u8; width * 3];
    for y in 0..height {
        for (x, &cell) in grid.row(y).iter().enumerate() {
            row_bytes[x * 3] = (cell & 0xFF) as u8;           // blue
            row_bytes[x * 3 + 1] = ((cell >> 8) & 0xFF) as u8; // green
            row_bytes[x * 3 + 2] = ((cell >> 16) & 0xFF) as u8; // red
        }
        out.write_all(&row_bytes)?;
    }
    Ok(())
}

/// Write `grid` to a TGA file at `path`.
///
/// The file is buffered and explicitly flushed; an error at any point
/// (open, write, flush) is returned and the output must be treated as
/// garbage. Nothing is retried.
pub fn write_tga<P: AsRef<Path>>(grid: &Grid, path: P) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    write_tga_to(grid, &mut out)?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::pack_rgb;

    #[test]
    fn test_header_layout() {
        let grid = Grid::new(300, 2);
        let mut buf = Vec::new();
        write_tga_to(&grid, &mut buf).unwrap();

        assert_eq!(buf.len(), HEADER_LEN + 300 * 2 * 3);
        assert_eq!(buf[0], 0, "image ID length");
        assert_eq!(buf[1], 0, "colour map type");
        assert_eq!(buf[2], 2, "uncompressed true-colour");
        assert_eq!(&buf[3..8], &[0, 0, 0, 0, 0], "colour map spec");
        assert_eq!(&buf[8..12], &[0, 0, 0, 0], "origins");
        // 300 = 0x012C little-endian.
        assert_eq!(&buf[12..14], &[0x2C, 0x01], "width");
        assert_eq!(&buf[14..16], &[2, 0], "height");
        assert_eq!(buf[16], 24, "bits per pixel");
        assert_eq!(buf[17], 0, "image descriptor");
    }

    #[test]
    fn test_pixels_are_bgr() {
        let mut grid = Grid::new(1, 1);
        grid.set(0, 0, pack_rgb(0x11, 0x22, 0x33));
        let mut buf = Vec::new();
        write_tga_to(&grid, &mut buf).unwrap();
        assert_eq!(&buf[HEADER_LEN..], &[0x33, 0x22, 0x11], "B, G, R order");
    }

    #[test]
    fn test_row_zero_emitted_first() {
        // 1×2 grid: row 0 white, row 1 black. Row 0's bytes must come first.
        let grid = Grid::from_vec(1, 2, vec![0xFFFFFF, 0x000000]);
        let mut buf = Vec::new();
        write_tga_to(&grid, &mut buf).unwrap();
        assert_eq!(&buf[HEADER_LEN..HEADER_LEN + 3], &[0xFF, 0xFF, 0xFF]);
        assert_eq!(&buf[HEADER_LEN + 3..], &[0, 0, 0]);
    }

    #[test]
    fn test_oversized_grid_rejected() {
        let grid = Grid::new(70_000, 1);
        let mut buf = Vec::new();
        let err = write_tga_to(&grid, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_write_error_propagates() {
        // A sink that fails after the header forces the row-write path
        // to report the error instead of claiming success.
        struct FailAfter(usize);
        impl Write for FailAfter {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                if self.0 == 0 {
                    return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
                }
                let n = buf.len().min(self.0);
                self.0 -= n;
                Ok(n)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let grid = Grid::new(4, 4);
        let mut sink = FailAfter(HEADER_LEN);
        assert!(write_tga_to(&grid, &mut sink).is_err());
    }
}
