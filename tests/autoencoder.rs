use ndarray::Array4;
use temporal_regularity::prelude::*;

const SHAPE: [usize; 4] = [3, 87, 87, 1];

fn small_config() -> AutoencoderConfig {
    AutoencoderConfig::default().with_channel_divisor(64)
}

fn small_model() -> ConvAutoencoder {
    ConvAutoencoder::new(small_config(), SHAPE).unwrap()
}

/// Three samples with different content so their reconstruction errors differ.
fn frames() -> Batch {
    Array4::from_shape_fn(SHAPE, |(n, h, w, _)| {
        let phase = (h * 3 + w * (n + 1)) as f32 * 0.05;
        0.5 + 0.4 * phase.sin() * (n as f32 + 1.0) / 3.0
    })
}

#[test]
fn reconstruction_has_the_input_shape() {
    let model = small_model();
    assert_eq!(model.plan().output(), SHAPE);
    assert_eq!(model.reconstruct(&frames()).unwrap().shape(), &SHAPE[..]);

    let rgb = [1, 100, 131, 3];
    let model = ConvAutoencoder::new(small_config(), rgb).unwrap();
    let out = model.reconstruct(&Array4::from_elem(rgb, 0.1)).unwrap();
    assert_eq!(out.shape(), &rgb[..]);
}

#[test]
fn reference_topology_size() {
    let model = ConvAutoencoder::with_defaults([1, 227, 227, 1]).unwrap();
    assert_eq!(model.parameter_count(), 12_955_905);
    assert_eq!(model.plan().bottleneck(), [1, 9, 9, 128]);
    assert_eq!(model.config(), &AutoencoderConfig::default());
    assert_eq!(small_model().parameter_count(), 5121);
}

#[test]
fn reconstruct_is_repeatable() {
    let model = small_model();
    let x = frames();
    let a = model.reconstruct(&x).unwrap();
    let b = model.reconstruct(&x).unwrap();
    assert_eq!(a, b);
}

#[test]
fn training_reduces_the_loss() {
    let config = small_config().with_learning_rate(1e-3);
    let mut model = ConvAutoencoder::new(config, SHAPE).unwrap();
    let x = Array4::from_elem(SHAPE, 0.5);
    let before = model.losses(&x).unwrap();
    for _ in 0..10 {
        model.fit(&x).unwrap();
    }
    let after = model.losses(&x).unwrap();
    assert!(
        after.total() < before.total(),
        "{:?} -> {:?}",
        before,
        after
    );
}

#[test]
fn fitting_zeros_only_shrinks_encoder_kernels() {
    let mut model = small_model();
    let zeros = Array4::zeros(SHAPE);
    let first = model.fit(&zeros).unwrap();
    let second = model.losses(&zeros).unwrap();
    assert_eq!(first.reconstruction_loss, 0.0);
    assert_eq!(second.reconstruction_loss, 0.0);
    assert!(second.regularization_loss < first.regularization_loss);
}

#[test]
fn one_step_changes_the_reconstruction() {
    let mut model = small_model();
    let zeros = Array4::zeros(SHAPE);
    let untrained = model.reconstruct(&zeros).unwrap();
    assert_eq!(untrained.shape(), &SHAPE[..]);

    model.fit(&frames()).unwrap();
    assert_ne!(model.reconstruct(&zeros).unwrap(), untrained);
}

#[test]
fn regularity_ranks_samples_by_error() {
    let model = small_model();
    let x = frames();
    let errors = model.pixel_error(&x).unwrap();
    let scores = model.regularity(&x).unwrap();
    assert_eq!(scores.len(), SHAPE[0]);
    assert!(scores.iter().all(|s| s.is_finite()));

    let argmin = (0..3)
        .min_by(|&a, &b| errors[a].partial_cmp(&errors[b]).unwrap())
        .unwrap();
    let argmax = (0..3)
        .max_by(|&a, &b| errors[a].partial_cmp(&errors[b]).unwrap())
        .unwrap();
    assert!(scores[argmin] >= scores[argmax]);
    assert_eq!(scores[argmax], 1.0);
}

#[test]
fn perfect_reconstruction_is_degenerate() {
    // freshly built: zero biases map zeros onto zeros exactly
    let model = small_model();
    let err = model.regularity(&Array4::zeros(SHAPE)).unwrap_err();
    assert!(matches!(
        err,
        AutoencoderError::NumericalDegeneracy { min_error, .. } if min_error == 0.0
    ));
}

#[test]
fn undersized_and_empty_shapes_are_config_errors() {
    for shape in [[1, 64, 64, 3], [0, 100, 100, 1], [1, 100, 100, 0]] {
        let err = ConvAutoencoder::new(AutoencoderConfig::default(), shape).unwrap_err();
        assert!(err.is_config(), "{:?}: {}", shape, err);
    }
}

#[test]
fn every_operation_checks_the_batch_shape() {
    let mut model = small_model();
    let wrong = Array4::zeros((2, 87, 87, 1));
    let is_mismatch = |r: Result<(), AutoencoderError>| {
        matches!(r, Err(AutoencoderError::ShapeMismatch { .. }))
    };
    assert!(is_mismatch(model.reconstruct(&wrong).map(drop)));
    assert!(is_mismatch(model.pixel_error(&wrong).map(drop)));
    assert!(is_mismatch(model.regularity(&wrong).map(drop)));
    assert!(is_mismatch(model.losses(&wrong).map(drop)));
    assert!(is_mismatch(model.fit(&wrong).map(drop)));
}
