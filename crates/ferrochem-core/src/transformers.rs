//! Label transformers.
//!
//! A [`TransformerGenerator`] is fitted on a dataset (normally the training split) and returns a
//! [`FittedTransformer`], which is serialisable so it can be cached next to the split datasets.
use crate::dataset::{Dataset, DiskDataset, Label, Sample};
use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use strum::{Display, EnumIter, EnumString};

pub trait Transformer {
    fn name(&self) -> &str;

    fn transform_label(&self, label: &Label) -> Result<Label>;

    fn untransform_label(&self, label: &Label) -> Result<Label>;

    fn transform_sample(&self, sample: Sample) -> Result<Sample> {
        let y = self.transform_label(&sample.y)?;
        Ok(Sample { y, ..sample })
    }

    /// Apply to every sample of `dataset`, writing the result to `out_dir`.
    fn transform(&self, dataset: &dyn Dataset, out_dir: &Path) -> Result<DiskDataset> {
        let samples = dataset
            .samples()?
            .into_iter()
            .map(|s| self.transform_sample(s))
            .collect::<Result<Vec<_>>>()?;
        DiskDataset::create(samples, dataset.tasks().to_vec(), out_dir)
    }
}

pub trait TransformerGenerator {
    /// Keys cached datasets, so two generators with the same name must transform alike.
    fn name(&self) -> String;

    fn create_transformer(&self, dataset: &dyn Dataset) -> Result<FittedTransformer>;
}

fn scalar(label: &Label, transformer: &str) -> Result<f64> {
    label
        .as_f64()
        .ok_or_else(|| anyhow!("{} transformer cannot be applied to mask labels", transformer))
}

fn scalar_labels(dataset: &dyn Dataset, transformer: &str) -> Result<Vec<f64>> {
    dataset
        .labels()?
        .iter()
        .map(|l| scalar(l, transformer))
        .collect()
}

/// `y <- (y - mean) / std`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizationTransformer {
    pub mean: f64,
    pub std: f64,
}

impl NormalizationTransformer {
    pub fn fit(dataset: &dyn Dataset) -> Result<Self> {
        let values = scalar_labels(dataset, "normalization")?;
        if values.is_empty() {
            bail!("cannot fit a normalization transformer on an empty dataset");
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        // constant labels would otherwise divide by zero
        let std = if var > 0.0 { var.sqrt() } else { 1.0 };
        Ok(Self { mean, std })
    }
}

impl Transformer for NormalizationTransformer {
    fn name(&self) -> &str {
        "normalization"
    }
    fn transform_label(&self, label: &Label) -> Result<Label> {
        Ok(Label::Value((scalar(label, self.name())? - self.mean) / self.std))
    }
    fn untransform_label(&self, label: &Label) -> Result<Label> {
        Ok(Label::Value(scalar(label, self.name())? * self.std + self.mean))
    }
}

/// `y <- ln(1 + y)`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LogTransformer;

impl Transformer for LogTransformer {
    fn name(&self) -> &str {
        "log"
    }
    fn transform_label(&self, label: &Label) -> Result<Label> {
        Ok(Label::Value(scalar(label, self.name())?.ln_1p()))
    }
    fn untransform_label(&self, label: &Label) -> Result<Label> {
        Ok(Label::Value(scalar(label, self.name())?.exp_m1()))
    }
}

/// `y <- (y - min) / (max - min)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MinMaxTransformer {
    pub min: f64,
    pub max: f64,
}

impl MinMaxTransformer {
    pub fn fit(dataset: &dyn Dataset) -> Result<Self> {
        let values = scalar_labels(dataset, "minmax")?;
        if values.is_empty() {
            bail!("cannot fit a minmax transformer on an empty dataset");
        }
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Ok(Self { min, max })
    }

    fn range(&self) -> f64 {
        if self.max > self.min {
            self.max - self.min
        } else {
            1.0
        }
    }
}

impl Transformer for MinMaxTransformer {
    fn name(&self) -> &str {
        "minmax"
    }
    fn transform_label(&self, label: &Label) -> Result<Label> {
        Ok(Label::Value((scalar(label, self.name())? - self.min) / self.range()))
    }
    fn untransform_label(&self, label: &Label) -> Result<Label> {
        Ok(Label::Value(scalar(label, self.name())? * self.range() + self.min))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "params", rename_all = "snake_case")]
pub enum FittedTransformer {
    Normalization(NormalizationTransformer),
    Log(LogTransformer),
    MinMax(MinMaxTransformer),
}

impl FittedTransformer {
    fn inner(&self) -> &dyn Transformer {
        match self {
            FittedTransformer::Normalization(t) => t,
            FittedTransformer::Log(t) => t,
            FittedTransformer::MinMax(t) => t,
        }
    }
}

impl Transformer for FittedTransformer {
    fn name(&self) -> &str {
        self.inner().name()
    }
    fn transform_label(&self, label: &Label) -> Result<Label> {
        self.inner().transform_label(label)
    }
    fn untransform_label(&self, label: &Label) -> Result<Label> {
        self.inner().untransform_label(label)
    }
}

/// Transformer generators that can be selected by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum TransformerKind {
    Normalization,
    Log,
    #[strum(serialize = "minmax")]
    MinMax,
}

impl TransformerGenerator for TransformerKind {
    fn name(&self) -> String {
        self.to_string()
    }

    fn create_transformer(&self, dataset: &dyn Dataset) -> Result<FittedTransformer> {
        Ok(match self {
            TransformerKind::Normalization => {
                FittedTransformer::Normalization(NormalizationTransformer::fit(dataset)?)
            }
            TransformerKind::Log => FittedTransformer::Log(LogTransformer),
            TransformerKind::MinMax => FittedTransformer::MinMax(MinMaxTransformer::fit(dataset)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Features, MemoryDataset};
    use std::path::PathBuf;
    use std::str::FromStr;

    fn counts(values: &[i64]) -> MemoryDataset {
        let samples = values
            .iter()
            .enumerate()
            .map(|(i, &v)| Sample::new(Features::Empty, Label::Count(v), format!("s{}", i)))
            .collect();
        MemoryDataset::new(samples, vec!["cell-count".into()]).unwrap()
    }

    #[test]
    fn test_normalization_centers_and_inverts() -> Result<()> {
        let ds = counts(&[2, 4, 6, 8]);
        let t = TransformerKind::Normalization.create_transformer(&ds)?;
        let dir = tempfile::tempdir()?;
        let out = t.transform(&ds, dir.path())?;
        let values: Vec<f64> = out
            .labels()?
            .iter()
            .map(|l| l.as_f64().unwrap())
            .collect();
        assert!(values.iter().sum::<f64>().abs() < 1e-9);
        let back = t.untransform_label(&Label::Value(values[3]))?;
        assert!((back.as_f64().unwrap() - 8.0).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_minmax_and_log() -> Result<()> {
        let ds = counts(&[10, 20, 30]);
        let minmax = TransformerKind::from_str("minmax")?.create_transformer(&ds)?;
        assert_eq!(minmax.transform_label(&Label::Count(20))?, Label::Value(0.5));
        assert_eq!(TransformerKind::MinMax.name(), "minmax");
        let log = TransformerKind::from_str("log")?.create_transformer(&ds)?;
        let y = log.transform_label(&Label::Count(0))?;
        assert_eq!(y, Label::Value(0.0));
        Ok(())
    }

    #[test]
    fn test_mask_labels_rejected() {
        let t = NormalizationTransformer { mean: 0.0, std: 1.0 };
        assert!(t
            .transform_label(&Label::Mask(PathBuf::from("m.png")))
            .is_err());
    }

    #[test]
    fn test_fitted_transformer_serde() -> Result<()> {
        let t = FittedTransformer::MinMax(MinMaxTransformer { min: 1.0, max: 3.0 });
        let json = serde_json::to_string(&t)?;
        let back: FittedTransformer = serde_json::from_str(&json)?;
        assert_eq!(back, t);
        assert_eq!(back.name(), "minmax");
        Ok(())
    }
}
