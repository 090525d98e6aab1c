//! CSV exports of reconstruction results.

use std::path::Path;

use astropix_algorithms::{CoarseCell, HitMap, TotMap, TotSpectrum};
use astropix_core::{NoiseMask, PixelHit};
use serde::Serialize;

use crate::Result;

fn write_rows<P, T, I>(path: P, rows: I) -> Result<usize>
where
    P: AsRef<Path>,
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    let mut wtr = csv::Writer::from_path(path)?;
    let mut n = 0;
    for row in rows {
        wtr.serialize(row)?;
        n += 1;
    }
    wtr.flush()?;
    Ok(n)
}

/// Writes pixel hits with the columns of [`PixelHit`].
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn write_pixel_hits<P: AsRef<Path>>(path: P, hits: &[PixelHit]) -> Result<usize> {
    write_rows(path, hits)
}

#[derive(Serialize)]
struct PixelCount {
    col: u16,
    row: u16,
    hits: u64,
}

/// Writes `col,row,hits` for every hit pixel.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn write_hit_map<P: AsRef<Path>>(path: P, map: &HitMap) -> Result<usize> {
    write_rows(
        path,
        map.iter().map(|(c, hits)| PixelCount {
            col: c.col,
            row: c.row,
            hits,
        }),
    )
}

#[derive(Serialize)]
struct PixelValue {
    col: u16,
    row: u16,
    value: Option<f64>,
}

/// Writes `col,row,value` for each coarse cell, labelled by its center.
/// Cells without data have an empty value.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn write_coarse_grid<P: AsRef<Path>>(path: P, cells: &[CoarseCell]) -> Result<usize> {
    write_rows(
        path,
        cells.iter().map(|cell| PixelValue {
            col: cell.center.col,
            row: cell.center.row,
            value: cell.value,
        }),
    )
}

/// Writes `col,row,value` with the mean ToT of every hit pixel.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn write_tot_map<P: AsRef<Path>>(path: P, map: &TotMap) -> Result<usize> {
    write_rows(
        path,
        map.iter().map(|(c, v)| PixelValue {
            col: c.col,
            row: c.row,
            value: Some(v),
        }),
    )
}

#[derive(Serialize)]
struct SpectrumBin {
    lo: f64,
    hi: f64,
    count: u64,
}

/// Writes `lo,hi,count` per spectrum bin.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn write_spectrum<P: AsRef<Path>>(path: P, spectrum: &TotSpectrum) -> Result<usize> {
    write_rows(
        path,
        spectrum
            .counts()
            .iter()
            .enumerate()
            .map(|(bin, &count)| {
                let (lo, hi) = spectrum.bin_edges(bin);
                SpectrumBin { lo, hi, count }
            }),
    )
}

#[derive(Serialize)]
struct MaskRow {
    col: u16,
    row: u16,
    masked: u8,
}

/// Writes `col,row,masked` (1 or 0) for every pixel in the noise table.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn write_mask<P: AsRef<Path>>(path: P, mask: &NoiseMask) -> Result<usize> {
    write_rows(
        path,
        mask.iter().map(|(c, masked)| MaskRow {
            col: c.col,
            row: c.row,
            masked: u8::from(masked),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use astropix_core::{ChipGeometry, GridSpec, NoiseCount};
    use tempfile::NamedTempFile;

    fn hit(col: u16, row: u16) -> PixelHit {
        PixelHit {
            col,
            row,
            timestamp_col: 10,
            timestamp_row: 10,
            tot_us_col: 2.0,
            tot_us_row: 2.5,
            avg_tot_us: 2.25,
        }
    }

    #[test]
    fn test_pixel_hits_csv() {
        let file = NamedTempFile::new().unwrap();
        let n = write_pixel_hits(file.path(), &[hit(3, 5)]).unwrap();
        assert_eq!(n, 1);
        let content = std::fs::read_to_string(file.path()).unwrap();
        assert!(content.starts_with(
            "col,row,timestamp_col,timestamp_row,tot_us_col,tot_us_row,avg_tot_us\n"
        ));
        assert!(content.contains("3,5,10,10,2.0,2.5,2.25"));
    }

    #[test]
    fn test_maps_and_grid() {
        let hits = [hit(0, 0), hit(0, 0), hit(1, 2)];
        let map = HitMap::from_hits(&hits);

        let file = NamedTempFile::new().unwrap();
        write_hit_map(file.path(), &map).unwrap();
        let content = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(content, "col,row,hits\n0,0,2\n1,2,1\n");

        let grid = NamedTempFile::new().unwrap();
        let cells = map.coarse(GridSpec::default(), ChipGeometry::default());
        assert_eq!(write_coarse_grid(grid.path(), &cells).unwrap(), 49);
        let content = std::fs::read_to_string(grid.path()).unwrap();
        assert!(content.contains("2,2,1.5\n"));
        assert!(content.contains("2,7,\n"));

        let tot = NamedTempFile::new().unwrap();
        write_tot_map(tot.path(), &TotMap::from_hits(&hits)).unwrap();
        assert!(std::fs::read_to_string(tot.path()).unwrap().contains("0,0,2.25"));
    }

    #[test]
    fn test_spectrum_and_mask() {
        let spectrum = TotSpectrum::from_hits(&[hit(0, 0)]);
        let file = NamedTempFile::new().unwrap();
        assert_eq!(write_spectrum(file.path(), &spectrum).unwrap(), 26);
        let content = std::fs::read_to_string(file.path()).unwrap();
        assert!(content.contains("1.5,2.5,1\n"));

        let mask = NoiseMask::build(&[NoiseCount::new(0, 0, 0), NoiseCount::new(0, 1, 9)], 4);
        let file = NamedTempFile::new().unwrap();
        write_mask(file.path(), &mask).unwrap();
        assert_eq!(
            std::fs::read_to_string(file.path()).unwrap(),
            "col,row,masked\n0,0,0\n0,1,1\n"
        );
    }
}
