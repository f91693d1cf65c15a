//! # ferrochem-molnet
//!
//! Benchmark dataset loaders.
//!
//! Every loader goes through [`MolnetLoader::load_dataset`]: raw files are fetched once into
//! `data_dir`, the dataset is built, split and transformed, and the split is cached under
//! `save_dir` so later calls with `reload` skip all of that.
//!
//! ```ignore
//! use ferrochem_molnet::{load_bbbc004, LoaderConfig};
//!
//! let (tasks, datasets, transformers) = load_bbbc004(0.3, false, LoaderConfig::default())?;
//! ```
mod bbbc;
mod config;
mod error;
mod loader;

pub use bbbc::{
    load_bbbc001, load_bbbc001_with_fetcher, load_bbbc002, load_bbbc002_with_fetcher,
    load_bbbc004, load_bbbc004_with_fetcher, Bbbc004, OverlapProbability, BBBC1_ANNOTATORS,
    BBBC1_IMAGES, BBBC1_LABELS, BBBC2_ANNOTATORS, BBBC2_IMAGES, BBBC2_LABELS,
    BBBC4_CELLS_PER_IMAGE, BBBC4_IMAGE_COUNT, CELL_COUNT_TASK,
};
pub use config::{default_data_dir, LoaderConfig, SplitterSpec, TransformerSpec, DATA_DIR_ENV};
pub use error::LoaderError;
pub use loader::{DatasetLoader, Datasets, LoadContext, Loaded, MolnetLoader};
