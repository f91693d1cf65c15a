//! Loaders for the Broad Bioimage Benchmark Collection
//! (<https://data.broadinstitute.org/bbbc/image_sets.html>).
use crate::config::LoaderConfig;
use crate::error::LoaderError;
use crate::loader::{DatasetLoader, LoadContext, Loaded, MolnetLoader};
use anyhow::Result;
use ferrochem_core::Dataset;
use ferrochem_io::{
    download_if_missing, read_annotator_counts, Fetcher, HttpFetcher, ImageInputs, ImageLoader,
};
use std::path::PathBuf;
use strum::{EnumIter, IntoEnumIterator};

const BBBC_URL: &str = "https://data.broadinstitute.org/bbbc";

pub const BBBC1_IMAGES: &str = "BBBC001_v1_images_tif.zip";
pub const BBBC1_LABELS: &str = "BBBC001_v1_counts.txt";
pub const BBBC1_ANNOTATORS: [&str; 2] = ["manual count #1", "manual count #2"];

pub const BBBC2_IMAGES: &str = "BBBC002_v1_images.zip";
pub const BBBC2_LABELS: &str = "BBBC002_v1_counts.txt";
pub const BBBC2_ANNOTATORS: [&str; 2] = [
    "human counter 1 (Robert Lindquist)",
    "human counter #2 (Joohan Chang)",
];

/// BBBC004 ships 20 synthetic images of 300 cells each.
pub const BBBC4_IMAGE_COUNT: usize = 20;
pub const BBBC4_CELLS_PER_IMAGE: i64 = 300;

pub const CELL_COUNT_TASK: &str = "cell-count";

fn url(set: &str, file: &str) -> String {
    format!("{}/{}/{}", BBBC_URL, set, file)
}

/// Fetch `file` of image set `set` into `ctx.data_dir` unless present.
fn fetch(ctx: &LoadContext, set: &str, file: &str) -> Result<PathBuf> {
    let path = ctx.data_dir.join(file);
    download_if_missing(ctx.fetcher, &url(set, file), &path)?;
    Ok(path)
}

/// Probability that two synthetic cells overlap in BBBC004.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub enum OverlapProbability {
    P00,
    P15,
    P30,
    P45,
    P60,
}

impl OverlapProbability {
    pub fn value(self) -> f64 {
        match self {
            OverlapProbability::P00 => 0.0,
            OverlapProbability::P15 => 0.15,
            OverlapProbability::P30 => 0.3,
            OverlapProbability::P45 => 0.45,
            OverlapProbability::P60 => 0.6,
        }
    }

    /// Two-digit code used in the archive names.
    pub fn code(self) -> &'static str {
        match self {
            OverlapProbability::P00 => "00",
            OverlapProbability::P15 => "15",
            OverlapProbability::P30 => "30",
            OverlapProbability::P45 => "45",
            OverlapProbability::P60 => "60",
        }
    }

    pub fn images_file(self) -> String {
        format!("BBBC004_v1_0{}_images.zip", self.code())
    }

    pub fn foreground_file(self) -> String {
        format!("BBBC004_v1_0{}_foreground.zip", self.code())
    }
}

impl TryFrom<f64> for OverlapProbability {
    type Error = LoaderError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::iter()
            .find(|p| (p.value() - value).abs() < 1e-9)
            .ok_or_else(|| LoaderError::InvalidOverlapProbability {
                value,
                valid: Self::iter().map(Self::value).collect(),
            })
    }
}

/// Counts are the truncated mean of two annotators.
struct AnnotatedCounts {
    name: &'static str,
    set: &'static str,
    images: &'static str,
    labels: &'static str,
    annotators: [&'static str; 2],
}

impl DatasetLoader for AnnotatedCounts {
    fn name(&self) -> String {
        self.name.to_string()
    }

    fn tasks(&self) -> Vec<String> {
        vec![CELL_COUNT_TASK.to_string()]
    }

    fn create_dataset(&self, ctx: &LoadContext) -> Result<Box<dyn Dataset>> {
        let images = fetch(ctx, self.set, self.images)?;
        let labels = fetch(ctx, self.set, self.labels)?;
        let counts = read_annotator_counts(&labels, &self.annotators)?;
        ImageLoader::default()
            .with_tasks(self.tasks())
            .with_data_dir(ctx.work_dir.join(self.name))
            .create_dataset(&ImageInputs::with_counts(images, counts), false)
    }
}

const BBBC001: AnnotatedCounts = AnnotatedCounts {
    name: "bbbc001",
    set: "BBBC001",
    images: BBBC1_IMAGES,
    labels: BBBC1_LABELS,
    annotators: BBBC1_ANNOTATORS,
};

const BBBC002: AnnotatedCounts = AnnotatedCounts {
    name: "bbbc002",
    set: "BBBC002",
    images: BBBC2_IMAGES,
    labels: BBBC2_LABELS,
    annotators: BBBC2_ANNOTATORS,
};

/// Synthetic cell populations: constant counts, or foreground masks as labels.
pub struct Bbbc004 {
    pub overlap: OverlapProbability,
    pub segmentation: bool,
}

impl DatasetLoader for Bbbc004 {
    fn name(&self) -> String {
        let mode = if self.segmentation { "masks" } else { "counts" };
        format!("bbbc004_0{}_{}", self.overlap.code(), mode)
    }

    fn tasks(&self) -> Vec<String> {
        vec![CELL_COUNT_TASK.to_string()]
    }

    fn create_dataset(&self, ctx: &LoadContext) -> Result<Box<dyn Dataset>> {
        let images = fetch(ctx, "BBBC004", &self.overlap.images_file())?;
        let inputs = if self.segmentation {
            let masks = fetch(ctx, "BBBC004", &self.overlap.foreground_file())?;
            ImageInputs::with_masks(images, masks)
        } else {
            ImageInputs::with_counts(images, vec![BBBC4_CELLS_PER_IMAGE; BBBC4_IMAGE_COUNT])
        };
        ImageLoader::new(false)
            .with_tasks(self.tasks())
            .with_data_dir(ctx.work_dir.join(self.name()))
            .create_dataset(&inputs, false)
    }
}

/// 6 images of HT29 colon cancer cells labelled with cell counts.
pub fn load_bbbc001(config: LoaderConfig) -> Result<Loaded> {
    load_bbbc001_with_fetcher(config, &HttpFetcher::new()?)
}

pub fn load_bbbc001_with_fetcher(config: LoaderConfig, fetcher: &dyn Fetcher) -> Result<Loaded> {
    MolnetLoader::new(config)?.load_dataset(&BBBC001, fetcher)
}

/// Drosophila Kc167 cells, 512x512 fields of view labelled with cell counts.
pub fn load_bbbc002(config: LoaderConfig) -> Result<Loaded> {
    load_bbbc002_with_fetcher(config, &HttpFetcher::new()?)
}

pub fn load_bbbc002_with_fetcher(config: LoaderConfig, fetcher: &dyn Fetcher) -> Result<Loaded> {
    MolnetLoader::new(config)?.load_dataset(&BBBC002, fetcher)
}

/// 20 synthetic 950x950 images of 300 cells each.
///
/// `overlap_probability` must be one of 0.0, 0.15, 0.3, 0.45 or 0.6; anything else fails with
/// [`LoaderError::InvalidOverlapProbability`] before any download. With
/// `load_segmentation_mask` the labels are foreground-mask images instead of counts.
pub fn load_bbbc004(
    overlap_probability: f64,
    load_segmentation_mask: bool,
    config: LoaderConfig,
) -> Result<Loaded> {
    let overlap = OverlapProbability::try_from(overlap_probability)?;
    load_bbbc004_overlap(overlap, load_segmentation_mask, config, &HttpFetcher::new()?)
}

pub fn load_bbbc004_with_fetcher(
    overlap_probability: f64,
    load_segmentation_mask: bool,
    config: LoaderConfig,
    fetcher: &dyn Fetcher,
) -> Result<Loaded> {
    let overlap = OverlapProbability::try_from(overlap_probability)?;
    load_bbbc004_overlap(overlap, load_segmentation_mask, config, fetcher)
}

fn load_bbbc004_overlap(
    overlap: OverlapProbability,
    segmentation: bool,
    config: LoaderConfig,
    fetcher: &dyn Fetcher,
) -> Result<Loaded> {
    let loader = Bbbc004 {
        overlap,
        segmentation,
    };
    MolnetLoader::new(config)?.load_dataset(&loader, fetcher)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap_codes() {
        let codes: Vec<&str> = OverlapProbability::iter().map(OverlapProbability::code).collect();
        assert_eq!(codes, ["00", "15", "30", "45", "60"]);
        assert_eq!(
            OverlapProbability::try_from(0.45).unwrap().images_file(),
            "BBBC004_v1_045_images.zip"
        );
        assert_eq!(
            OverlapProbability::P00.foreground_file(),
            "BBBC004_v1_000_foreground.zip"
        );
    }

    #[test]
    fn test_invalid_overlap_names_valid_set() {
        let err = OverlapProbability::try_from(0.2).unwrap_err();
        assert_eq!(
            err,
            LoaderError::InvalidOverlapProbability {
                value: 0.2,
                valid: vec![0.0, 0.15, 0.3, 0.45, 0.6],
            }
        );
        let message = err.to_string();
        assert!(message.contains("0.2"));
        assert!(message.contains("0.15"));
    }

    #[test]
    fn test_urls() {
        assert_eq!(
            url("BBBC001", BBBC1_LABELS),
            "https://data.broadinstitute.org/bbbc/BBBC001/BBBC001_v1_counts.txt"
        );
    }

    #[test]
    fn test_bbbc004_cache_keys_differ() {
        let counts = Bbbc004 {
            overlap: OverlapProbability::P30,
            segmentation: false,
        };
        let masks = Bbbc004 {
            overlap: OverlapProbability::P30,
            segmentation: true,
        };
        assert_ne!(counts.name(), masks.name());
    }
}
