//! Loader configuration.
use crate::error::LoaderError;
use bon::Builder;
use ferrochem_core::{SplitFractions, Splitter, SplitterKind, TransformerGenerator, TransformerKind};
use ferrochem_featurizers::FeaturizerSpec;
use std::path::PathBuf;
use std::str::FromStr;

/// Environment variable naming the default directory for raw downloads and cached datasets.
pub const DATA_DIR_ENV: &str = "FERROCHEM_DATA_DIR";

/// `$FERROCHEM_DATA_DIR`, or the system temp directory.
pub fn default_data_dir() -> PathBuf {
    std::env::var_os(DATA_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
}

/// A splitter chosen by name (`index`, `random`), supplied as an instance, or no splitting at all.
pub enum SplitterSpec {
    Name(String),
    Instance(Box<dyn Splitter>),
    /// Return the whole dataset as one.
    Unsplit,
}

impl Default for SplitterSpec {
    fn default() -> Self {
        SplitterSpec::Name(SplitterKind::Index.to_string())
    }
}

impl SplitterSpec {
    pub fn resolve(self) -> Result<Option<Box<dyn Splitter>>, LoaderError> {
        match self {
            SplitterSpec::Name(name) => SplitterKind::from_str(&name)
                .map(|kind| Some(kind.create()))
                .map_err(|_| LoaderError::UnknownSplitter(name)),
            SplitterSpec::Instance(splitter) => Ok(Some(splitter)),
            SplitterSpec::Unsplit => Ok(None),
        }
    }
}

impl From<&str> for SplitterSpec {
    fn from(name: &str) -> Self {
        SplitterSpec::Name(name.to_string())
    }
}

impl<S: Splitter + 'static> From<Box<S>> for SplitterSpec {
    fn from(splitter: Box<S>) -> Self {
        SplitterSpec::Instance(splitter)
    }
}

/// A transformer generator chosen by name (`normalization`, `log`, `minmax`) or supplied as an
/// instance.
pub enum TransformerSpec {
    Name(String),
    Instance(Box<dyn TransformerGenerator>),
}

impl TransformerSpec {
    pub fn resolve(self) -> Result<Box<dyn TransformerGenerator>, LoaderError> {
        match self {
            TransformerSpec::Name(name) => TransformerKind::from_str(&name)
                .map(|kind| Box::new(kind) as Box<dyn TransformerGenerator>)
                .map_err(|_| LoaderError::UnknownTransformer(name)),
            TransformerSpec::Instance(generator) => Ok(generator),
        }
    }
}

impl From<&str> for TransformerSpec {
    fn from(name: &str) -> Self {
        TransformerSpec::Name(name.to_string())
    }
}

impl From<TransformerKind> for TransformerSpec {
    fn from(kind: TransformerKind) -> Self {
        TransformerSpec::Instance(Box::new(kind))
    }
}

/// Settings shared by every dataset loader.
///
/// ```ignore
/// let config = LoaderConfig::builder()
///     .splitter("random")
///     .seed(42)
///     .transformers(vec!["normalization".into()])
///     .build();
/// ```
#[derive(Builder)]
pub struct LoaderConfig {
    /// Image loaders do not featurize; the name still keys the cache folder.
    #[builder(default = FeaturizerSpec::from("UserDefinedFeaturizer"), into)]
    pub featurizer: FeaturizerSpec,
    #[builder(default, into)]
    pub splitter: SplitterSpec,
    #[builder(default)]
    pub transformers: Vec<TransformerSpec>,
    /// Raw downloads; [`default_data_dir`] when unset.
    #[builder(into)]
    pub data_dir: Option<PathBuf>,
    /// Featurized, split datasets; [`default_data_dir`] when unset.
    #[builder(into)]
    pub save_dir: Option<PathBuf>,
    pub seed: Option<u64>,
    #[builder(default)]
    pub fractions: SplitFractions,
    /// Reuse (and write) the cached split when present.
    #[builder(default = true)]
    pub reload: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
