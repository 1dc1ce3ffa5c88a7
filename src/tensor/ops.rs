//! # Tensor Operations
//!
//! Reductions and shape checks shared by the loss functions and the model.

use super::{Batch, TensorData, TensorError};
use ndarray::{Array1, ArrayBase, Axis, Data, Dimension};

/// Fails with `ShapeMismatch` unless both shapes are identical.
pub fn check_shape(expected: &[usize], got: &[usize]) -> Result<(), TensorError> {
    if expected != got {
        return Err(TensorError::ShapeMismatch {
            expected: expected.to_vec(),
            got: got.to_vec(),
        });
    }
    Ok(())
}

/// Sum of squared elements.
pub fn sum_squares<S, D>(a: &ArrayBase<S, D>) -> TensorData
where
    S: Data<Elem = TensorData>,
    D: Dimension,
{
    a.fold(0.0, |acc, &v| acc + v * v)
}

/// Element-wise difference `a - b` of two batches of identical shape.
pub fn sub(a: &Batch, b: &Batch) -> Result<Batch, TensorError> {
    if a.shape() != b.shape() {
        return Err(TensorError::IncompatibleShapes {
            op: "sub".to_string(),
            shape1: a.shape().to_vec(),
            shape2: b.shape().to_vec(),
        });
    }
    Ok(a - b)
}

/// Per-sample sum of squared differences over height, width and channels.
pub fn squared_error_per_sample(x: &Batch, y: &Batch) -> Result<Array1<TensorData>, TensorError> {
    let diff = sub(x, y)?;
    Ok(diff
        .axis_iter(Axis(0))
        .map(|sample| sum_squares(&sample))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, Array4};

    #[test]
    fn per_sample_error_sums_over_all_but_batch() {
        let x = Array4::from_elem((2, 2, 2, 1), 1.0);
        let mut y = Array4::zeros((2, 2, 2, 1));
        y[[1, 0, 0, 0]] = 3.0;
        let e = squared_error_per_sample(&x, &y).unwrap();
        assert_eq!(e, arr1(&[4.0, 3.0 + 4.0]));
    }

    #[test]
    fn sub_rejects_incompatible_batches() {
        let a = Array4::<f32>::zeros((1, 2, 2, 1));
        let b = Array4::<f32>::zeros((1, 2, 3, 1));
        assert!(matches!(
            sub(&a, &b),
            Err(TensorError::IncompatibleShapes { .. })
        ));
    }

    #[test]
    fn check_shape_reports_both_sides() {
        match check_shape(&[1, 2], &[2, 1]) {
            Err(TensorError::ShapeMismatch { expected, got }) => {
                assert_eq!(expected, vec![1, 2]);
                assert_eq!(got, vec![2, 1]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
