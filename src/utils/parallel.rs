//! # Parallelism Utilities (CPU Threading)
//!
//! Per-sample data parallelism over a batch using `rayon`. Every sample of a
//! convolution is independent, so work is split along the batch axis and the
//! results are gathered back in sample order. Reductions across samples are
//! folded sequentially afterwards so the summation order never depends on
//! thread scheduling.

use crate::tensor::{Batch, TensorData, TensorError};
use ndarray::{Array, Array3, ArrayView3, Axis, Dimension};
use rayon::prelude::*;

/// Runs `f` on every sample index in parallel and returns the results in
/// index order. Any failing sample fails the whole map.
pub fn map_samples<T, F>(num_samples: usize, f: F) -> Result<Vec<T>, TensorError>
where
    T: Send,
    F: Fn(usize) -> Result<T, TensorError> + Sync + Send,
{
    (0..num_samples).into_par_iter().map(f).collect()
}

/// Borrow sample `i` of a batch.
pub fn sample(batch: &Batch, i: usize) -> ArrayView3<'_, TensorData> {
    batch.index_axis(Axis(0), i)
}

/// Stacks per-sample results back into a batch (gather).
pub fn gather(samples: &[Array3<TensorData>]) -> Result<Batch, TensorError> {
    if samples.is_empty() {
        return Err(TensorError::Generic("Gather received no samples".into()));
    }
    let views: Vec<ArrayView3<TensorData>> = samples.iter().map(|s| s.view()).collect();
    Ok(ndarray::stack(Axis(0), &views)?)
}

/// Sums per-sample partial results in index order.
pub fn sum_in_order<D: Dimension>(
    parts: Vec<Array<TensorData, D>>,
) -> Result<Array<TensorData, D>, TensorError> {
    let mut iter = parts.into_iter();
    let mut total = iter
        .next()
        .ok_or_else(|| TensorError::Generic("Nothing to reduce".into()))?;
    for part in iter {
        if part.shape() != total.shape() {
            return Err(TensorError::ShapeMismatch {
                expected: total.shape().to_vec(),
                got: part.shape().to_vec(),
            });
        }
        total += &part;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, Array4};

    #[test]
    fn results_keep_sample_order() {
        let out = map_samples(64, |i| Ok(i * 2)).unwrap();
        assert_eq!(out, (0..64).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test]
    fn first_error_is_reported() {
        let res: Result<Vec<usize>, _> = map_samples(8, |i| {
            if i >= 3 {
                Err(TensorError::Generic(format!("sample {}", i)))
            } else {
                Ok(i)
            }
        });
        assert!(res.is_err());
    }

    #[test]
    fn gather_restores_the_batch() {
        let batch = Array4::from_shape_fn((3, 2, 2, 1), |(n, h, w, _)| (n * 4 + h * 2 + w) as f32);
        let parts: Vec<Array3<f32>> = (0..3).map(|i| sample(&batch, i).to_owned()).collect();
        assert_eq!(gather(&parts).unwrap(), batch);
        assert!(gather(&[]).is_err());
    }

    #[test]
    fn sum_in_order_adds_everything() {
        let total = sum_in_order(vec![arr1(&[1.0, 2.0]), arr1(&[3.0, 4.0])]).unwrap();
        assert_eq!(total, arr1(&[4.0, 6.0]));
        assert!(sum_in_order(vec![arr1(&[1.0]), arr1(&[1.0, 2.0])]).is_err());
    }
}
