//! Datasets
//!
//! A dataset is an ordered collection of `(x, y, w, id)` samples. Two variants exist:
//!
//! - [`MemoryDataset`] holds every sample in a `Vec`.
//! - [`DiskDataset`] keeps samples in JSON shards under a directory and reads them on demand.
//!   The directory is the identity of the dataset.
//!
use anyhow::{anyhow, bail, Context, Result};
use ndarray::{Array2, ArrayD};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

const METADATA_FILE: &str = "metadata.json";
const DEFAULT_SHARD_SIZE: usize = 4096;

/// Node/edge representation of a molecular graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphData {
    /// `[num_nodes, num_node_features]`
    pub node_features: Array2<f32>,
    /// `[2, num_edges]`: row 0 holds sources, row 1 destinations.
    pub edge_index: Array2<usize>,
    /// `[num_edges, num_edge_features]`
    pub edge_features: Option<Array2<f32>>,
}

impl GraphData {
    pub fn num_nodes(&self) -> usize {
        self.node_features.nrows()
    }
    pub fn num_edges(&self) -> usize {
        self.edge_index.ncols()
    }
}

/// The `x` of a sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Features {
    Array(ArrayD<f32>),
    Text(String),
    Graph(GraphData),
    /// Reference to an image on disk; pixels are decoded by the caller.
    Image(PathBuf),
    Empty,
}

/// The `y` of a sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Label {
    Count(i64),
    Value(f64),
    /// Reference to a segmentation-mask image.
    Mask(PathBuf),
}

/// Scalar and mask labels never share a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelKind {
    Scalar,
    Mask,
}

impl Label {
    pub fn kind(&self) -> LabelKind {
        match self {
            Label::Count(_) | Label::Value(_) => LabelKind::Scalar,
            Label::Mask(_) => LabelKind::Mask,
        }
    }

    /// Numeric value of a scalar label; `None` for masks.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Label::Count(c) => Some(*c as f64),
            Label::Value(v) => Some(*v),
            Label::Mask(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub x: Features,
    pub y: Label,
    pub w: f32,
    pub id: String,
}

impl Sample {
    pub fn new(x: Features, y: Label, id: impl Into<String>) -> Self {
        Self {
            x,
            y,
            w: 1.0,
            id: id.into(),
        }
    }
}

/// Returns the single label kind of `samples`, or an error if scalars and masks are mixed.
fn uniform_label_kind(samples: &[Sample]) -> Result<Option<LabelKind>> {
    let mut kind = None;
    for sample in samples {
        match kind {
            None => kind = Some(sample.y.kind()),
            Some(k) if k != sample.y.kind() => bail!(
                "sample '{}' has a {:?} label but the dataset holds {:?} labels",
                sample.id,
                sample.y.kind(),
                k
            ),
            Some(_) => {}
        }
    }
    Ok(kind)
}

pub trait Dataset {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn tasks(&self) -> &[String];

    /// `None` for an empty dataset.
    fn label_kind(&self) -> Option<LabelKind>;

    fn sample(&self, index: usize) -> Result<Sample>;

    /// Materialize every sample in order.
    fn samples(&self) -> Result<Vec<Sample>> {
        (0..self.len()).map(|i| self.sample(i)).collect()
    }

    fn ids(&self) -> Result<Vec<String>> {
        Ok(self.samples()?.into_iter().map(|s| s.id).collect())
    }

    fn labels(&self) -> Result<Vec<Label>> {
        Ok(self.samples()?.into_iter().map(|s| s.y).collect())
    }
}

// In-Memory ------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryDataset {
    samples: Vec<Sample>,
    tasks: Vec<String>,
    label_kind: Option<LabelKind>,
}

impl MemoryDataset {
    pub fn new(samples: Vec<Sample>, tasks: Vec<String>) -> Result<Self> {
        let label_kind = uniform_label_kind(&samples)?;
        Ok(Self {
            samples,
            tasks,
            label_kind,
        })
    }

    pub fn select(&self, indices: &[usize]) -> Result<Self> {
        let samples = indices
            .iter()
            .map(|&i| {
                self.samples
                    .get(i)
                    .cloned()
                    .ok_or_else(|| anyhow!("index {} out of bounds for {} samples", i, self.len()))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(samples, self.tasks.clone())
    }

    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
    }
}

impl Dataset for MemoryDataset {
    fn len(&self) -> usize {
        self.samples.len()
    }
    fn tasks(&self) -> &[String] {
        &self.tasks
    }
    fn label_kind(&self) -> Option<LabelKind> {
        self.label_kind
    }
    fn sample(&self, index: usize) -> Result<Sample> {
        self.samples
            .get(index)
            .cloned()
            .ok_or_else(|| anyhow!("index {} out of bounds for {} samples", index, self.len()))
    }
    fn samples(&self) -> Result<Vec<Sample>> {
        Ok(self.samples.clone())
    }
}

// On-Disk --------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Metadata {
    tasks: Vec<String>,
    label_kind: Option<LabelKind>,
    shard_sizes: Vec<usize>,
}

/// Out-of-core dataset backed by a directory of JSON shards.
#[derive(Debug, Clone, PartialEq)]
pub struct DiskDataset {
    data_dir: PathBuf,
    metadata: Metadata,
}

fn shard_path(dir: &Path, shard: usize) -> PathBuf {
    dir.join(format!("shard-{:05}.json", shard))
}

impl DiskDataset {
    /// Write `samples` to `data_dir`, replacing any dataset already there.
    pub fn create<P: AsRef<Path>>(
        samples: Vec<Sample>,
        tasks: Vec<String>,
        data_dir: P,
    ) -> Result<Self> {
        Self::create_sharded(samples, tasks, data_dir, DEFAULT_SHARD_SIZE)
    }

    pub fn create_sharded<P: AsRef<Path>>(
        samples: Vec<Sample>,
        tasks: Vec<String>,
        data_dir: P,
        shard_size: usize,
    ) -> Result<Self> {
        if shard_size == 0 {
            bail!("shard_size must be positive");
        }
        let data_dir = data_dir.as_ref().to_path_buf();
        let label_kind = uniform_label_kind(&samples)?;

        if data_dir.exists() {
            fs::remove_dir_all(&data_dir)
                .with_context(|| format!("Cannot clear '{}'", data_dir.display()))?;
        }
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("Cannot create '{}'", data_dir.display()))?;

        let mut shard_sizes = Vec::new();
        for (shard, chunk) in samples.chunks(shard_size).enumerate() {
            let path = shard_path(&data_dir, shard);
            let writer = BufWriter::new(
                File::create(&path).with_context(|| format!("Cannot write '{}'", path.display()))?,
            );
            serde_json::to_writer(writer, chunk)?;
            shard_sizes.push(chunk.len());
        }

        let metadata = Metadata {
            tasks,
            label_kind,
            shard_sizes,
        };
        let meta_path = data_dir.join(METADATA_FILE);
        serde_json::to_writer_pretty(BufWriter::new(File::create(&meta_path)?), &metadata)?;

        tracing::debug!(
            "Wrote {} samples in {} shards to {}",
            samples.len(),
            metadata.shard_sizes.len(),
            data_dir.display()
        );
        Ok(Self { data_dir, metadata })
    }

    /// Copy any dataset onto disk.
    pub fn from_dataset<P: AsRef<Path>>(dataset: &dyn Dataset, data_dir: P) -> Result<Self> {
        Self::create(dataset.samples()?, dataset.tasks().to_vec(), data_dir)
    }

    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let meta_path = data_dir.join(METADATA_FILE);
        let file = File::open(&meta_path)
            .with_context(|| format!("No dataset metadata at '{}'", meta_path.display()))?;
        let metadata: Metadata = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Malformed dataset metadata '{}'", meta_path.display()))?;
        Ok(Self { data_dir, metadata })
    }

    /// True when `data_dir` holds a readable dataset.
    pub fn exists<P: AsRef<Path>>(data_dir: P) -> bool {
        data_dir.as_ref().join(METADATA_FILE).is_file()
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn num_shards(&self) -> usize {
        self.metadata.shard_sizes.len()
    }

    pub fn shard(&self, shard: usize) -> Result<Vec<Sample>> {
        if shard >= self.num_shards() {
            bail!("shard {} out of bounds for {} shards", shard, self.num_shards());
        }
        let path = shard_path(&self.data_dir, shard);
        let file =
            File::open(&path).with_context(|| format!("Cannot read shard '{}'", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Malformed shard '{}'", path.display()))
    }

    /// Lazily iterate shards in order.
    pub fn iter_shards(&self) -> impl Iterator<Item = Result<Vec<Sample>>> + '_ {
        (0..self.num_shards()).map(move |s| self.shard(s))
    }

    /// Write the samples at `indices` (in that order) to a new dataset at `data_dir`.
    pub fn select<P: AsRef<Path>>(&self, indices: &[usize], data_dir: P) -> Result<DiskDataset> {
        let all = self.samples()?;
        let picked = indices
            .iter()
            .map(|&i| {
                all.get(i)
                    .cloned()
                    .ok_or_else(|| anyhow!("index {} out of bounds for {} samples", i, all.len()))
            })
            .collect::<Result<Vec<_>>>()?;
        DiskDataset::create(picked, self.metadata.tasks.clone(), data_dir)
    }
}

impl Dataset for DiskDataset {
    fn len(&self) -> usize {
        self.metadata.shard_sizes.iter().sum()
    }
    fn tasks(&self) -> &[String] {
        &self.metadata.tasks
    }
    fn label_kind(&self) -> Option<LabelKind> {
        self.metadata.label_kind
    }
    fn sample(&self, index: usize) -> Result<Sample> {
        let mut offset = index;
        for (shard, &size) in self.metadata.shard_sizes.iter().enumerate() {
            if offset < size {
                return Ok(self.shard(shard)?.swap_remove(offset));
            }
            offset -= size;
        }
        Err(anyhow!(
            "index {} out of bounds for {} samples",
            index,
            self.len()
        ))
    }
    fn samples(&self) -> Result<Vec<Sample>> {
        let mut out = Vec::with_capacity(self.len());
        for shard in self.iter_shards() {
            out.extend(shard?);
        }
        Ok(out)
    }
}
