//! # ferrochem-core
//!
//! The dataset abstraction shared by the featurizers, the loaders and the models.
//!
//! __ferrochem-core__ provides:
//! * [`Sample`], [`Features`] and [`Label`]: one `(x, y, w, id)` record
//! * [`Dataset`] with an in-memory ([`MemoryDataset`]) and an out-of-core ([`DiskDataset`]) variant
//! * [`Splitter`]s that partition a dataset into train/valid/test
//! * [`Transformer`]s that are fitted on a dataset and applied to its labels
//!
mod dataset;
mod splitters;
mod transformers;

pub use self::dataset::{
    Dataset, DiskDataset, Features, GraphData, Label, LabelKind, MemoryDataset, Sample,
};
pub use self::splitters::{
    IndexSplitter, RandomSplitter, SpecifiedSplitter, SplitFractions, SplitIndices, Splitter,
    SplitterKind,
};
pub use self::transformers::{
    FittedTransformer, LogTransformer, MinMaxTransformer, NormalizationTransformer, Transformer,
    TransformerGenerator, TransformerKind,
};
