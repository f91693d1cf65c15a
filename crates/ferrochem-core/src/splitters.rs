//! Splitters partition a dataset into train, validation and test subsets.
use crate::dataset::{Dataset, DiskDataset};
use anyhow::{anyhow, bail, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use strum::{Display, EnumIter, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitFractions {
    pub train: f64,
    pub valid: f64,
    pub test: f64,
}

impl Default for SplitFractions {
    fn default() -> Self {
        Self {
            train: 0.8,
            valid: 0.1,
            test: 0.1,
        }
    }
}

impl SplitFractions {
    pub fn new(train: f64, valid: f64, test: f64) -> Result<Self> {
        let fractions = Self { train, valid, test };
        fractions.validate()?;
        Ok(fractions)
    }

    pub fn validate(&self) -> Result<()> {
        if [self.train, self.valid, self.test].iter().any(|f| *f < 0.0) {
            bail!("split fractions must be non-negative, got {:?}", self);
        }
        let total = self.train + self.valid + self.test;
        if (total - 1.0).abs() > 1e-6 {
            bail!("split fractions must sum to 1, got {}", total);
        }
        Ok(())
    }

    /// `(train_cutoff, valid_cutoff)` for `n` samples.
    fn cutoffs(&self, n: usize) -> (usize, usize) {
        let train_cutoff = (self.train * n as f64) as usize;
        let valid_cutoff = (((self.train + self.valid) * n as f64) as usize).min(n);
        (train_cutoff.min(valid_cutoff), valid_cutoff)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub valid: Vec<usize>,
    pub test: Vec<usize>,
}

impl SplitIndices {
    fn from_order(order: Vec<usize>, fractions: &SplitFractions) -> Self {
        let (train_cutoff, valid_cutoff) = fractions.cutoffs(order.len());
        Self {
            train: order[..train_cutoff].to_vec(),
            valid: order[train_cutoff..valid_cutoff].to_vec(),
            test: order[valid_cutoff..].to_vec(),
        }
    }
}

pub trait Splitter {
    fn name(&self) -> &str;

    fn split(
        &self,
        dataset: &dyn Dataset,
        fractions: SplitFractions,
        seed: Option<u64>,
    ) -> Result<SplitIndices>;

    /// Split `dataset` and write each subset as a [`DiskDataset`].
    fn train_valid_test_split(
        &self,
        dataset: &dyn Dataset,
        fractions: SplitFractions,
        seed: Option<u64>,
        train_dir: &Path,
        valid_dir: &Path,
        test_dir: &Path,
    ) -> Result<(DiskDataset, DiskDataset, DiskDataset)> {
        fractions.validate()?;
        let indices = self.split(dataset, fractions, seed)?;
        tracing::info!(
            "{} split: {} train, {} valid, {} test",
            self.name(),
            indices.train.len(),
            indices.valid.len(),
            indices.test.len()
        );
        let samples = dataset.samples()?;
        let tasks = dataset.tasks().to_vec();
        let pick = |idx: &[usize]| {
            idx.iter()
                .map(|&i| {
                    samples
                        .get(i)
                        .cloned()
                        .ok_or_else(|| anyhow!("split index {} out of bounds", i))
                })
                .collect::<Result<Vec<_>>>()
        };
        let train = DiskDataset::create(pick(&indices.train)?, tasks.clone(), train_dir)?;
        let valid = DiskDataset::create(pick(&indices.valid)?, tasks.clone(), valid_dir)?;
        let test = DiskDataset::create(pick(&indices.test)?, tasks, test_dir)?;
        Ok((train, valid, test))
    }
}

/// Keeps dataset order: the first samples train, the last samples test.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexSplitter;

impl Splitter for IndexSplitter {
    fn name(&self) -> &str {
        "index"
    }
    fn split(
        &self,
        dataset: &dyn Dataset,
        fractions: SplitFractions,
        _seed: Option<u64>,
    ) -> Result<SplitIndices> {
        fractions.validate()?;
        Ok(SplitIndices::from_order(
            (0..dataset.len()).collect(),
            &fractions,
        ))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSplitter;

impl Splitter for RandomSplitter {
    fn name(&self) -> &str {
        "random"
    }
    fn split(
        &self,
        dataset: &dyn Dataset,
        fractions: SplitFractions,
        seed: Option<u64>,
    ) -> Result<SplitIndices> {
        fractions.validate()?;
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut order: Vec<usize> = (0..dataset.len()).collect();
        order.shuffle(&mut rng);
        Ok(SplitIndices::from_order(order, &fractions))
    }
}

/// Uses caller-supplied validation and test indices; everything else trains.
#[derive(Debug, Clone, Default)]
pub struct SpecifiedSplitter {
    pub valid_indices: Vec<usize>,
    pub test_indices: Vec<usize>,
}

impl Splitter for SpecifiedSplitter {
    fn name(&self) -> &str {
        "specified"
    }
    fn split(
        &self,
        dataset: &dyn Dataset,
        _fractions: SplitFractions,
        _seed: Option<u64>,
    ) -> Result<SplitIndices> {
        let n = dataset.len();
        if let Some(bad) = self
            .valid_indices
            .iter()
            .chain(&self.test_indices)
            .find(|&&i| i >= n)
        {
            bail!("specified index {} out of bounds for {} samples", bad, n);
        }
        if let Some(dup) = self
            .valid_indices
            .iter()
            .find(|i| self.test_indices.contains(i))
        {
            bail!("index {} is both a validation and a test index", dup);
        }
        let train = (0..n)
            .filter(|i| !self.valid_indices.contains(i) && !self.test_indices.contains(i))
            .collect();
        Ok(SplitIndices {
            train,
            valid: self.valid_indices.clone(),
            test: self.test_indices.clone(),
        })
    }
}

/// Splitters that can be selected by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum SplitterKind {
    Index,
    Random,
}

impl SplitterKind {
    pub fn create(self) -> Box<dyn Splitter> {
        match self {
            SplitterKind::Index => Box::new(IndexSplitter),
            SplitterKind::Random => Box::new(RandomSplitter),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Features, Label, MemoryDataset, Sample};
    use itertools::Itertools;
    use std::str::FromStr;

    fn dataset(n: usize) -> MemoryDataset {
        let samples = (0..n)
            .map(|i| Sample::new(Features::Empty, Label::Count(i as i64), format!("s{}", i)))
            .collect();
        MemoryDataset::new(samples, vec!["count".into()]).unwrap()
    }

    #[test]
    fn test_index_split_keeps_order() {
        let split = IndexSplitter
            .split(&dataset(10), SplitFractions::default(), None)
            .unwrap();
        assert_eq!(split.train, (0..8).collect::<Vec<_>>());
        assert_eq!(split.valid, vec![8]);
        assert_eq!(split.test, vec![9]);
    }

    #[test]
    fn test_random_split_is_seeded_partition() {
        let ds = dataset(50);
        let a = RandomSplitter
            .split(&ds, SplitFractions::default(), Some(7))
            .unwrap();
        let b = RandomSplitter
            .split(&ds, SplitFractions::default(), Some(7))
            .unwrap();
        assert_eq!(a, b);
        let all: Vec<usize> = a
            .train
            .iter()
            .chain(&a.valid)
            .chain(&a.test)
            .copied()
            .sorted()
            .collect();
        assert_eq!(all, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_bad_fractions_rejected() {
        assert!(SplitFractions::new(0.5, 0.5, 0.5).is_err());
        assert!(IndexSplitter
            .split(
                &dataset(3),
                SplitFractions {
                    train: 0.9,
                    valid: 0.2,
                    test: 0.0
                },
                None
            )
            .is_err());
    }

    #[test]
    fn test_specified_split() {
        let splitter = SpecifiedSplitter {
            valid_indices: vec![1],
            test_indices: vec![3, 4],
        };
        let split = splitter
            .split(&dataset(5), SplitFractions::default(), None)
            .unwrap();
        assert_eq!(split.train, vec![0, 2]);
        assert!(SpecifiedSplitter {
            valid_indices: vec![9],
            test_indices: vec![]
        }
        .split(&dataset(5), SplitFractions::default(), None)
        .is_err());
    }

    #[test]
    fn test_train_valid_test_split_writes_disk_datasets() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (train, valid, test) = IndexSplitter.train_valid_test_split(
            &dataset(10),
            SplitFractions::default(),
            None,
            &dir.path().join("train"),
            &dir.path().join("valid"),
            &dir.path().join("test"),
        )?;
        assert_eq!((train.len(), valid.len(), test.len()), (8, 1, 1));
        assert_eq!(test.ids()?, vec!["s9"]);
        assert!(DiskDataset::exists(dir.path().join("valid")));
        Ok(())
    }

    #[test]
    fn test_splitter_by_name() {
        assert_eq!(SplitterKind::from_str("index").unwrap().create().name(), "index");
        assert_eq!(SplitterKind::from_str("random").unwrap().create().name(), "random");
        assert!(SplitterKind::from_str("scaffold").is_err());
    }
}
