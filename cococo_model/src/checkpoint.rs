// Checkpoint loading: manifest + binary shards → named weight tensors.
//
// A checkpoint is a set of files addressed by relative path:
// - `weights_manifest.json`: a list of groups, each naming its shard files
//   (`paths`) and the weights stored in them (`name`, `shape`, `dtype`,
//   optional `quantization`);
// - the shard files themselves: for each group, the shards are concatenated
//   in `paths` order and the weights are read back-to-back, little-endian;
// - optionally `config.json`: a partial `ModelSpec` (camelCase keys).
//
// Supported encodings are plain `float32`, and `uint8`/`uint16` quantized
// weights, which dequantize as `min + scale * q`.
//
// Files are read through the `ShardSource` trait so the same loader serves a
// directory on disk (`DirectorySource`) and an in-memory file set
// (`MemorySource`, used by tests and by callers that fetch files themselves).
// `Checkpoint::to_files` is the inverse of `load` and writes float32 shards.

use crate::error::CheckpointError;
use crate::spec::{LayerKind, ModelSpec};
use ndarray::{Array1, Array4, ArrayD, IxDyn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "weights_manifest.json";
pub const CONFIG_FILE: &str = "config.json";
const SHARD_FILE: &str = "group1-shard1of1.bin";

// --- Manifest ----------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestGroup {
    pub paths: Vec<String>,
    pub weights: Vec<WeightEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightEntry {
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantization: Option<WeightQuantization>,
}

/// Affine quantization: stored integers `q` decode to `min + scale * q`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightQuantization {
    pub dtype: String,
    pub min: f32,
    pub scale: f32,
}

impl WeightEntry {
    fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    /// Bytes per stored element, or None for an unsupported encoding.
    fn element_size(&self) -> Option<usize> {
        match &self.quantization {
            Some(q) => match q.dtype.as_str() {
                "uint8" => Some(1),
                "uint16" => Some(2),
                _ => None,
            },
            None => match self.dtype.as_str() {
                "float32" => Some(4),
                _ => None,
            },
        }
    }

    fn unsupported(&self) -> CheckpointError {
        let dtype = match &self.quantization {
            Some(q) => q.dtype.clone(),
            None => self.dtype.clone(),
        };
        CheckpointError::UnsupportedDtype {
            name: self.name.clone(),
            dtype,
        }
    }

    fn decode(&self, bytes: &[u8]) -> Vec<f32> {
        match &self.quantization {
            Some(q) if q.dtype == "uint16" => bytes
                .chunks_exact(2)
                .map(|c| q.min + q.scale * u16::from_le_bytes([c[0], c[1]]) as f32)
                .collect(),
            Some(q) => bytes.iter().map(|&b| q.min + q.scale * b as f32).collect(),
            None => bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        }
    }
}

// --- Sources -----------------------------------------------------------------

/// Read access to the files of one checkpoint.
pub trait ShardSource {
    fn read(&self, path: &str) -> Result<Vec<u8>, CheckpointError>;
    fn contains(&self, path: &str) -> bool;
}

/// Checkpoint files in a directory.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirectorySource { root: root.into() }
    }
}

impl ShardSource for DirectorySource {
    fn read(&self, path: &str) -> Result<Vec<u8>, CheckpointError> {
        let full = self.root.join(path);
        std::fs::read(&full).map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => CheckpointError::MissingFile(full.display().to_string()),
            _ => CheckpointError::Io {
                path: full.display().to_string(),
                source,
            },
        })
    }

    fn contains(&self, path: &str) -> bool {
        self.root.join(path).is_file()
    }
}

/// Checkpoint files held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    files: HashMap<String, Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, bytes: Vec<u8>) {
        self.files.insert(path.into(), bytes);
    }
}

impl FromIterator<(String, Vec<u8>)> for MemorySource {
    fn from_iter<I: IntoIterator<Item = (String, Vec<u8>)>>(iter: I) -> Self {
        MemorySource {
            files: iter.into_iter().collect(),
        }
    }
}

impl ShardSource for MemorySource {
    fn read(&self, path: &str) -> Result<Vec<u8>, CheckpointError> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| CheckpointError::MissingFile(path.to_string()))
    }

    fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }
}

// --- Weights -----------------------------------------------------------------

/// Named weight tensors.
#[derive(Debug, Clone, Default)]
pub struct WeightStore {
    tensors: BTreeMap<String, ArrayD<f32>>,
}

impl WeightStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: ArrayD<f32>) {
        self.tensors.insert(name.into(), tensor);
    }

    pub fn get(&self, name: &str) -> Option<&ArrayD<f32>> {
        self.tensors.get(name)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    fn checked(&self, name: &str, expected: &[usize]) -> Result<&ArrayD<f32>, CheckpointError> {
        let tensor = self
            .tensors
            .get(name)
            .ok_or_else(|| CheckpointError::MissingVariable(name.to_string()))?;
        if tensor.shape() != expected {
            return Err(CheckpointError::ShapeMismatch {
                name: name.to_string(),
                expected: expected.to_vec(),
                actual: tensor.shape().to_vec(),
            });
        }
        Ok(tensor)
    }

    /// A 4-D weight with the given shape.
    pub fn get4(&self, name: &str, shape: [usize; 4]) -> Result<Array4<f32>, CheckpointError> {
        let tensor = self.checked(name, &shape)?;
        tensor
            .clone()
            .into_dimensionality()
            .map_err(|_| CheckpointError::ShapeMismatch {
                name: name.to_string(),
                expected: shape.to_vec(),
                actual: tensor.shape().to_vec(),
            })
    }

    /// A vector weight of the given length.
    pub fn get1(&self, name: &str, len: usize) -> Result<Array1<f32>, CheckpointError> {
        let tensor = self.checked(name, &[len])?;
        Ok(tensor.iter().copied().collect())
    }

    /// Read every weight listed in the manifest.
    pub fn decode(
        manifest: &[ManifestGroup],
        source: &dyn ShardSource,
    ) -> Result<WeightStore, CheckpointError> {
        let mut store = WeightStore::new();
        for group in manifest {
            let mut data = Vec::new();
            for path in &group.paths {
                data.extend(source.read(path)?);
            }
            let mut offset = 0;
            for entry in &group.weights {
                let size = entry.element_size().ok_or_else(|| entry.unsupported())?;
                let needed = entry.num_elements() * size;
                let available = data.len() - offset;
                if needed > available {
                    return Err(CheckpointError::ShortShard {
                        name: entry.name.clone(),
                        needed,
                        available,
                    });
                }
                let values = entry.decode(&data[offset..offset + needed]);
                offset += needed;
                let tensor = ArrayD::from_shape_vec(IxDyn(&entry.shape), values).map_err(|_| {
                    CheckpointError::ShapeMismatch {
                        name: entry.name.clone(),
                        expected: entry.shape.clone(),
                        actual: vec![needed / size],
                    }
                })?;
                store.insert(entry.name.clone(), tensor);
            }
        }
        Ok(store)
    }

    /// Serialize as a single float32 shard. Returns the manifest and the
    /// shard bytes.
    pub fn encode(&self, shard_path: &str) -> (Vec<ManifestGroup>, Vec<u8>) {
        let mut bytes = Vec::new();
        let mut weights = Vec::with_capacity(self.tensors.len());
        for (name, tensor) in &self.tensors {
            for &v in tensor.iter() {
                bytes.extend_from_slice(&v.to_le_bytes());
            }
            weights.push(WeightEntry {
                name: name.clone(),
                shape: tensor.shape().to_vec(),
                dtype: "float32".to_string(),
                quantization: None,
            });
        }
        let group = ManifestGroup {
            paths: vec![shard_path.to_string()],
            weights,
        };
        (vec![group], bytes)
    }
}

// --- Checkpoint --------------------------------------------------------------

/// A model spec plus the weights it names.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub spec: ModelSpec,
    pub weights: WeightStore,
}

impl Checkpoint {
    pub fn load(source: &dyn ShardSource) -> Result<Checkpoint, CheckpointError> {
        let manifest: Vec<ManifestGroup> = parse_json(MANIFEST_FILE, &source.read(MANIFEST_FILE)?)?;
        let spec: ModelSpec = if source.contains(CONFIG_FILE) {
            parse_json(CONFIG_FILE, &source.read(CONFIG_FILE)?)?
        } else {
            ModelSpec::default()
        };
        spec.validate()?;
        let weights = WeightStore::decode(&manifest, source)?;
        tracing::info!(
            weights = weights.len(),
            layers = spec.layer_plan().len(),
            "checkpoint loaded"
        );
        Ok(Checkpoint { spec, weights })
    }

    pub fn load_dir(path: &Path) -> Result<Checkpoint, CheckpointError> {
        Checkpoint::load(&DirectorySource::new(path))
    }

    /// The manifest, shard and config files for this checkpoint.
    pub fn to_files(&self) -> Result<Vec<(String, Vec<u8>)>, CheckpointError> {
        let (manifest, shard) = self.weights.encode(SHARD_FILE);
        Ok(vec![
            (MANIFEST_FILE.to_string(), to_json(MANIFEST_FILE, &manifest)?),
            (CONFIG_FILE.to_string(), to_json(CONFIG_FILE, &self.spec)?),
            (SHARD_FILE.to_string(), shard),
        ])
    }

    pub fn save_dir(&self, path: &Path) -> Result<(), CheckpointError> {
        let io_error = |p: &Path, source| CheckpointError::Io {
            path: p.display().to_string(),
            source,
        };
        std::fs::create_dir_all(path).map_err(|e| io_error(path, e))?;
        for (name, bytes) in self.to_files()? {
            let file = path.join(name);
            std::fs::write(&file, bytes).map_err(|e| io_error(&file, e))?;
        }
        Ok(())
    }

    /// Freshly initialized weights for `spec`: small random filters and
    /// identity batch-norm statistics.
    pub fn initialized<R: Rng + ?Sized>(spec: ModelSpec, rng: &mut R) -> Result<Checkpoint, CheckpointError> {
        spec.validate()?;
        let mut weights = WeightStore::new();
        for layer in spec.layer_plan() {
            let fan_in = match layer.kind {
                LayerKind::Regular => layer.filters[0] * layer.filters[1] * layer.in_channels(),
                _ => layer.in_channels(),
            };
            let bound = (1.0 / fan_in.max(1) as f32).sqrt();
            for (name, shape) in layer.variables() {
                let tensor = if name.ends_with("/gamma") || name.ends_with("/popvariance") {
                    ArrayD::ones(IxDyn(&shape))
                } else if name.ends_with("/beta") || name.ends_with("/popmean") {
                    ArrayD::zeros(IxDyn(&shape))
                } else {
                    ArrayD::from_shape_simple_fn(IxDyn(&shape), || rng.random_range(-bound..bound))
                };
                weights.insert(name, tensor);
            }
        }
        Ok(Checkpoint { spec, weights })
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(file: &str, bytes: &[u8]) -> Result<T, CheckpointError> {
    serde_json::from_slice(bytes).map_err(|source| CheckpointError::Json {
        file: file.to_string(),
        source,
    })
}

fn to_json<T: Serialize>(file: &str, value: &T) -> Result<Vec<u8>, CheckpointError> {
    serde_json::to_vec_pretty(value).map_err(|source| CheckpointError::Json {
        file: file.to_string(),
        source,
    })
}
