//! Masked per-pixel statistics over observation stacks.
//!
//! A stack is an `observations × pixels` array. The value `0` is no-data
//! and never enters a statistic; a pixel with no valid observation yields 0.
use ndarray::{Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;

use crate::error::{Error, Result};

pub const NODATA: f32 = 0.0;

#[inline]
fn is_valid(v: f32) -> bool {
    v != NODATA && v.is_finite()
}

/// Stack equally sized 2-D bands into an `observations × pixels` array.
pub fn stack_bands(bands: &[Array2<f32>]) -> Result<Array2<f32>> {
    let first = bands
        .first()
        .ok_or_else(|| Error::Processing("cannot stack zero observations".into()))?;
    let (rows, cols) = first.dim();
    let mut stack = Array2::<f32>::zeros((bands.len(), rows * cols));
    for (i, band) in bands.iter().enumerate() {
        if band.dim() != (rows, cols) {
            return Err(Error::DimensionMismatch {
                expected_rows: rows,
                expected_cols: cols,
                rows: band.nrows(),
                cols: band.ncols(),
            });
        }
        for (dst, &src) in stack.row_mut(i).iter_mut().zip(band.iter()) {
            *dst = src;
        }
    }
    Ok(stack)
}

fn median_of(column: ArrayView1<f32>, scratch: &mut Vec<f32>) -> f32 {
    scratch.clear();
    scratch.extend(column.iter().copied().filter(|&v| is_valid(v)));
    let n = scratch.len();
    if n == 0 {
        return NODATA;
    }
    scratch.sort_by(|a, b| a.total_cmp(b));
    if n % 2 == 1 {
        scratch[n / 2]
    } else {
        // even count: mean of the two central values
        ((scratch[n / 2 - 1] as f64 + scratch[n / 2] as f64) / 2.0) as f32
    }
}

/// Per-pixel median of valid observations.
pub fn masked_median(stack: ArrayView2<f32>) -> Vec<f32> {
    (0..stack.ncols())
        .into_par_iter()
        .map_init(Vec::new, |scratch, p| median_of(stack.column(p), scratch))
        .collect()
}

/// Per-pixel mean of valid observations.
pub fn masked_mean(stack: ArrayView2<f32>) -> Vec<f64> {
    (0..stack.ncols())
        .into_par_iter()
        .map(|p| {
            let (sum, count) = stack
                .column(p)
                .iter()
                .filter(|&&v| is_valid(v))
                .fold((0.0f64, 0usize), |(s, c), &v| (s + v as f64, c + 1));
            if count == 0 { 0.0 } else { sum / count as f64 }
        })
        .collect()
}

/// Truncate a coherence median (stored as DN = coherence × 100) into a Byte
/// raster. Medians of valid observations are ≥ 1, so 0 stays reserved for
/// no-data.
pub fn quantize_u8(values: &[f32]) -> Vec<u8> {
    values
        .iter()
        .map(|&v| if is_valid(v) { v.clamp(0.0, 255.0) as u8 } else { 0 })
        .collect()
}

/// Scale DN values back to coherence units, keeping no-data at 0.
pub fn to_coherence(values: &[f32]) -> Vec<f32> {
    values
        .iter()
        .map(|&v| if is_valid(v) { v / 100.0 } else { NODATA })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn median_ignores_nodata_and_averages_even_counts() {
        let stack = array![
            [10.0f32, 0.0, 5.0, 0.0],
            [30.0, 0.0, 7.0, 40.0],
            [20.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 9.0, 0.0],
        ];
        assert_eq!(masked_median(stack.view()), vec![20.0, 0.0, 7.0, 40.0]);

        let even = array![[10.0f32], [21.0]];
        assert_eq!(masked_median(even.view()), vec![15.5]);
    }

    #[test]
    fn mean_of_fully_masked_pixel_is_nodata() {
        let stack = array![[2.0f32, 0.0], [4.0, 0.0], [0.0, 0.0]];
        assert_eq!(masked_mean(stack.view()), vec![3.0, 0.0]);
    }

    #[test]
    fn stacking_rejects_mismatched_shapes() {
        let a = Array2::<f32>::zeros((2, 3));
        let b = Array2::<f32>::zeros((3, 2));
        assert!(matches!(
            stack_bands(&[a.clone(), b]),
            Err(Error::DimensionMismatch { .. })
        ));
        assert_eq!(stack_bands(&[a.clone(), a]).unwrap().dim(), (2, 6));
    }

    #[test]
    fn quantization_truncates_and_keeps_nodata() {
        assert_eq!(quantize_u8(&[0.0, 15.5, 300.0, 1.0]), vec![0, 15, 255, 1]);
        assert_eq!(to_coherence(&[0.0, 50.0]), vec![0.0, 0.5]);
    }

    #[test]
    fn median_is_repeatable() {
        let stack = Array2::from_shape_fn((7, 500), |(o, p)| ((o * 31 + p * 17) % 97) as f32);
        assert_eq!(masked_median(stack.view()), masked_median(stack.view()));
    }
}
