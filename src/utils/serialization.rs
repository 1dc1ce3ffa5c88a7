//! # Checkpoint Serialization
//!
//! Saves and restores the parameter registry. Uses `serde` for serialization
//! and `bincode` as the binary format.
//!
//! Layout: a [`Header`] (magic tag and format version) followed by the list of
//! `(name, shape, flat data)` entries in registry order. Loading is strict: the
//! checkpoint must describe exactly the registry it is loaded into, and nothing
//! is written to the registry until every entry has been validated.

use crate::nn::registry::ParamRegistry;
use crate::tensor::TensorData;

use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const MAGIC: [u8; 8] = *b"TRAECKPT";
const FORMAT_VERSION: u32 = 1;

// --- Error Type ---
#[derive(thiserror::Error, Debug)]
pub enum SerializationError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization Error (Bincode): {0}")]
    Bincode(#[from] bincode::Error),
    #[error("Unrecognised checkpoint format: {0}")]
    Format(String),
    #[error("Checkpoint holds {got} parameters, model has {expected}")]
    ParameterCount { expected: usize, got: usize },
    #[error("Parameter {index}: expected '{expected}', checkpoint has '{got}'")]
    NameMismatch {
        index: usize,
        expected: String,
        got: String,
    },
    #[error(
        "Tensor shape mismatch during loading: key '{key}', expected {expected:?}, got {got:?}"
    )]
    ShapeMismatch {
        key: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("Parameter '{key}' has {got} values, its shape needs {expected}")]
    DataLength {
        key: String,
        expected: usize,
        got: usize,
    },
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
struct Header {
    magic: [u8; 8],
    version: u32,
}

// --- Serializable Tensor Wrapper ---
#[derive(Serialize, Deserialize, Debug)]
struct SerializableTensor {
    name: String,
    shape: Vec<usize>,
    // Store data as a flat Vec<TensorData> in logical (row-major) order
    data: Vec<TensorData>,
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_then_rename(
    tmp: &Path,
    path: &Path,
    header: &Header,
    tensors: &[SerializableTensor],
) -> Result<(), SerializationError> {
    let mut writer = BufWriter::new(File::create(tmp)?);
    bincode::serialize_into(&mut writer, header)?;
    bincode::serialize_into(&mut writer, tensors)?;
    writer.flush()?;
    drop(writer);
    fs::rename(tmp, path)?;
    Ok(())
}

// --- Save Function ---

/// Writes every registry entry to `path`.
///
/// The file is written next to its destination and renamed into place, so an
/// interrupted save never leaves a truncated checkpoint at `path`. On failure
/// the temporary file is removed.
pub fn save<P: AsRef<Path>>(params: &ParamRegistry, path: P) -> Result<(), SerializationError> {
    let path = path.as_ref();
    let tensors: Vec<SerializableTensor> = params
        .iter()
        .map(|(_, p)| SerializableTensor {
            name: p.name().to_string(),
            shape: p.shape().to_vec(),
            data: p.value().iter().copied().collect(),
        })
        .collect();
    let header = Header {
        magic: MAGIC,
        version: FORMAT_VERSION,
    };

    let tmp = temp_path(path);
    if let Err(err) = write_then_rename(&tmp, path, &header, &tensors) {
        // the partial file is useless; a failed removal must not hide `err`
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    debug!(path = %path.display(), tensors = tensors.len(), "checkpoint written");
    Ok(())
}

// --- Load Function ---

/// Reads the checkpoint at `path` into `params`.
///
/// Fails without touching `params` unless the checkpoint holds the same number
/// of entries with the same names, order and shapes.
pub fn load<P: AsRef<Path>>(params: &mut ParamRegistry, path: P) -> Result<(), SerializationError> {
    let path = path.as_ref();
    let mut reader = BufReader::new(File::open(path)?);

    let header: Header = bincode::deserialize_from(&mut reader)
        .map_err(|e| SerializationError::Format(format!("unreadable header: {}", e)))?;
    if header.magic != MAGIC {
        return Err(SerializationError::Format(format!(
            "bad magic {:?}",
            header.magic
        )));
    }
    if header.version != FORMAT_VERSION {
        return Err(SerializationError::Format(format!(
            "unsupported version {} (expected {})",
            header.version, FORMAT_VERSION
        )));
    }
    let loaded: Vec<SerializableTensor> = bincode::deserialize_from(&mut reader)?;

    // --- Validation, nothing is assigned before it passes ---
    let expected = params.signature();
    if loaded.len() != expected.len() {
        return Err(SerializationError::ParameterCount {
            expected: expected.len(),
            got: loaded.len(),
        });
    }
    let mut arrays = Vec::with_capacity(loaded.len());
    for (index, (tensor, (name, shape))) in loaded.into_iter().zip(expected).enumerate() {
        if tensor.name != name {
            return Err(SerializationError::NameMismatch {
                index,
                expected: name,
                got: tensor.name,
            });
        }
        if tensor.shape != shape {
            return Err(SerializationError::ShapeMismatch {
                key: name,
                expected: shape,
                got: tensor.shape,
            });
        }
        let needed: usize = shape.iter().product();
        if tensor.data.len() != needed {
            return Err(SerializationError::DataLength {
                key: name,
                expected: needed,
                got: tensor.data.len(),
            });
        }
        let array = ArrayD::from_shape_vec(IxDyn(&shape), tensor.data).map_err(|e| {
            SerializationError::Format(format!("cannot rebuild '{}': {}", name, e))
        })?;
        arrays.push(array);
    }

    // --- Data Update ---
    let ids: Vec<_> = params.iter().map(|(id, _)| id).collect();
    for (id, array) in ids.into_iter().zip(arrays) {
        let target = params.value_mut(id).map_err(|e| {
            SerializationError::Format(format!("cannot restore parameter: {}", e))
        })?;
        *target = array;
    }
    debug!(path = %path.display(), tensors = params.len(), "checkpoint restored");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::registry::ParamRole;
    use crate::tensor::zeros;
    use std::io::Write as _;

    fn registry(shape: &[usize], fill: TensorData) -> ParamRegistry {
        let mut reg = ParamRegistry::new();
        reg.register("conv_h1", ParamRole::Conv2d, zeros(shape) + fill)
            .unwrap();
        reg.register("conv_h1", ParamRole::Biases, zeros(&[1, 1, 1, 2]) - fill)
            .unwrap();
        reg
    }

    #[test]
    fn round_trip_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.ckpt");
        let mut src = registry(&[3, 3, 1, 2], 0.0);
        *src.value_mut(src.id_of("conv_h1/conv2d").unwrap()).unwrap() =
            ArrayD::from_shape_fn(IxDyn(&[3, 3, 1, 2]), |i| (i[0] * 7 + i[1]) as f32 * 0.1 - 0.3);
        save(&src, &path).unwrap();
        assert!(!temp_path(&path).exists());

        let mut dst = registry(&[3, 3, 1, 2], 9.0);
        load(&mut dst, &path).unwrap();
        for ((_, a), (_, b)) in src.iter().zip(dst.iter()) {
            assert_eq!(a.value(), b.value());
        }
    }

    #[test]
    fn failed_save_removes_the_temporary_file() {
        let dir = tempfile::tempdir().unwrap();
        // a directory at the destination makes the final rename fail
        let path = dir.path().join("occupied");
        fs::create_dir(&path).unwrap();

        let err = save(&registry(&[3, 3, 1, 2], 1.0), &path).unwrap_err();
        assert!(matches!(err, SerializationError::Io(_)));
        assert!(!temp_path(&path).exists());
        assert!(path.is_dir());
    }

    #[test]
    fn restored_values_are_exactly_those_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.ckpt");
        let src = registry(&[2, 2, 1, 2], 0.25);
        save(&src, &path).unwrap();

        let mut dst = registry(&[2, 2, 1, 2], -3.0);
        load(&mut dst, &path).unwrap();
        assert_eq!(dst.len(), src.len());
        for ((_, a), (_, b)) in src.iter().zip(dst.iter()) {
            assert_eq!(a.name(), b.name());
            assert_eq!(a.value(), b.value());
        }
        assert!(dst
            .by_name("conv_h1/biases")
            .unwrap()
            .value()
            .iter()
            .all(|&v| v == -0.25));
    }

    #[test]
    fn shape_mismatch_leaves_registry_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.ckpt");
        save(&registry(&[3, 3, 1, 2], 1.0), &path).unwrap();

        let mut dst = registry(&[5, 5, 1, 2], 4.0);
        let err = load(&mut dst, &path).unwrap_err();
        assert!(matches!(err, SerializationError::ShapeMismatch { .. }));
        assert!(dst.iter().all(|(_, p)| p.value().iter().all(|&v| v.abs() == 4.0)));
    }

    #[test]
    fn count_and_name_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.ckpt");
        save(&registry(&[1], 1.0), &path).unwrap();

        let mut bigger = registry(&[1], 0.0);
        bigger.register("conv_h2", ParamRole::Conv2d, zeros(&[1])).unwrap();
        assert!(matches!(
            load(&mut bigger, &path),
            Err(SerializationError::ParameterCount { expected: 3, got: 2 })
        ));

        let mut renamed = ParamRegistry::new();
        renamed.register("conv_h9", ParamRole::Conv2d, zeros(&[1])).unwrap();
        renamed.register("conv_h9", ParamRole::Biases, zeros(&[1, 1, 1, 2])).unwrap();
        assert!(matches!(
            load(&mut renamed, &path),
            Err(SerializationError::NameMismatch { index: 0, .. })
        ));
    }

    #[test]
    fn garbage_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.ckpt");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"definitely not a checkpoint, just some bytes").unwrap();
        drop(f);

        let mut reg = registry(&[1], 2.0);
        assert!(matches!(load(&mut reg, &path), Err(SerializationError::Format(_))));
        assert!(matches!(
            load(&mut reg, dir.path().join("missing.ckpt")),
            Err(SerializationError::Io(_))
        ));
    }
}
