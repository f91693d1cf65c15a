use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum LoaderError {
    #[error("overlap_probability must be one of {valid:?}, got {value}")]
    InvalidOverlapProbability { value: f64, valid: Vec<f64> },
    #[error("unknown splitter '{0}'")]
    UnknownSplitter(String),
    #[error("unknown transformer '{0}'")]
    UnknownTransformer(String),
}
