//! ferrochem-io
//!
//! File and network plumbing behind the dataset loaders:
//!
//! - [`Fetcher`]: download a URL into a directory, once.
//! - [`read_annotator_counts`]: per-sample labels from tab-delimited count tables.
//! - [`ImageLoader`]: package image archives plus labels or masks into a dataset.
//!
mod fetch;
mod images;
mod labels;

pub use fetch::{download_if_missing, file_name_from_url, Fetcher, HttpFetcher};
pub use images::{load_image, ImageInputs, ImageLabels, ImageLoader, IMAGE_EXTENSIONS};
pub use labels::{average_columns, read_annotator_counts, read_delimited};
