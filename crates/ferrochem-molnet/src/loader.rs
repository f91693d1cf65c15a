//! The shared load pipeline: fetch and build a raw dataset, split it, fit transformers on the
//! training split and cache the result.
//!
//! Every returned dataset lives under the save folder. Intermediate datasets are written to a
//! scratch directory that is removed when the load returns.
use crate::config::{default_data_dir, LoaderConfig};
use anyhow::{Context, Result};
use ferrochem_core::{
    Dataset, DiskDataset, FittedTransformer, SplitFractions, Splitter, Transformer,
    TransformerGenerator,
};
use ferrochem_featurizers::Featurizer;
use ferrochem_io::Fetcher;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

const TRAIN_DIR: &str = "train_dir";
const VALID_DIR: &str = "valid_dir";
const TEST_DIR: &str = "test_dir";
const DATASET_DIR: &str = "dataset_dir";
const TRANSFORMERS_FILE: &str = "transformers.json";
/// Written last; a save folder without it holds no usable cache.
const SETTINGS_FILE: &str = "split.json";
const NO_SPLIT: &str = "nosplit";

/// What a dataset loader needs to build its raw dataset.
pub struct LoadContext<'a> {
    /// Where raw downloads live.
    pub data_dir: &'a Path,
    /// Scratch space for the raw dataset; removed when the load returns.
    pub work_dir: &'a Path,
    pub featurizer: &'a dyn Featurizer,
    pub fetcher: &'a dyn Fetcher,
}

/// One dataset of the collection.
pub trait DatasetLoader {
    /// Keys the save folder: `<save_dir>/<name>-featurized/...`.
    fn name(&self) -> String;

    fn tasks(&self) -> Vec<String>;

    /// Fetch missing raw files and build the unsplit, untransformed dataset.
    fn create_dataset(&self, ctx: &LoadContext) -> Result<Box<dyn Dataset>>;
}

pub enum Datasets {
    Split {
        train: DiskDataset,
        valid: DiskDataset,
        test: DiskDataset,
    },
    /// Returned when no splitter is configured.
    Single(Box<dyn Dataset>),
}

impl Datasets {
    /// `(train, valid, test)`, or `None` for an unsplit load.
    pub fn split(&self) -> Option<(&DiskDataset, &DiskDataset, &DiskDataset)> {
        match self {
            Datasets::Split { train, valid, test } => Some((train, valid, test)),
            Datasets::Single(_) => None,
        }
    }

    pub fn all(&self) -> Vec<&dyn Dataset> {
        match self {
            Datasets::Split { train, valid, test } => vec![train as &dyn Dataset, valid, test],
            Datasets::Single(dataset) => vec![dataset.as_ref()],
        }
    }
}

/// Task names, datasets and the transformers that were applied to them.
pub type Loaded = (Vec<String>, Datasets, Vec<FittedTransformer>);

/// Split settings that are not part of the save folder path. A cache built with different
/// settings is rebuilt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CacheSettings {
    seed: Option<u64>,
    fractions: Option<SplitFractions>,
}

impl CacheSettings {
    fn matches(&self, other: &CacheSettings) -> bool {
        let same_fractions = match (self.fractions, other.fractions) {
            (Some(a), Some(b)) => [
                (a.train, b.train),
                (a.valid, b.valid),
                (a.test, b.test),
            ]
            .iter()
            .all(|(x, y)| (x - y).abs() < 1e-12),
            (None, None) => true,
            _ => false,
        };
        self.seed == other.seed && same_fractions
    }
}

/// A [`LoaderConfig`] with every name resolved.
pub struct MolnetLoader {
    featurizer: Box<dyn Featurizer>,
    splitter: Option<Box<dyn Splitter>>,
    transformers: Vec<Box<dyn TransformerGenerator>>,
    data_dir: PathBuf,
    save_dir: PathBuf,
    seed: Option<u64>,
    fractions: SplitFractions,
    reload: bool,
}

impl MolnetLoader {
    pub fn new(config: LoaderConfig) -> Result<Self> {
        config.fractions.validate()?;
        let transformers = config
            .transformers
            .into_iter()
            .map(|t| t.resolve())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            featurizer: config.featurizer.resolve()?,
            splitter: config.splitter.resolve()?,
            transformers,
            data_dir: config.data_dir.unwrap_or_else(default_data_dir),
            save_dir: config.save_dir.unwrap_or_else(default_data_dir),
            seed: config.seed,
            fractions: config.fractions,
            reload: config.reload,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// `<save_dir>/<name>-featurized/<featurizer>/<splitter or nosplit>[/<transformers>]`,
    /// with the transformer names joined by `_`.
    pub fn save_folder(&self, name: &str) -> PathBuf {
        let splitter = self.splitter.as_ref().map_or(NO_SPLIT, |s| s.name());
        let folder = self
            .save_dir
            .join(format!("{}-featurized", name))
            .join(self.featurizer.name())
            .join(splitter);
        if self.transformers.is_empty() {
            return folder;
        }
        let names: Vec<String> = self.transformers.iter().map(|t| t.name()).collect();
        folder.join(names.join("_"))
    }

    fn settings(&self) -> CacheSettings {
        match self.splitter {
            Some(_) => CacheSettings {
                seed: self.seed,
                fractions: Some(self.fractions),
            },
            None => CacheSettings {
                seed: None,
                fractions: None,
            },
        }
    }

    pub fn load_dataset(&self, loader: &dyn DatasetLoader, fetcher: &dyn Fetcher) -> Result<Loaded> {
        let name = loader.name();
        let tasks = loader.tasks();
        let save_folder = self.save_folder(&name);

        if self.reload {
            if let Some((datasets, transformers)) = self.load_cached(&save_folder)? {
                tracing::info!("Reloading {} from {}", name, save_folder.display());
                return Ok((tasks, datasets, transformers));
            }
        }
        invalidate(&save_folder)?;

        fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("Cannot create '{}'", self.data_dir.display()))?;
        tracing::info!("Loading {} from {}", name, self.data_dir.display());
        let scratch = tempfile::Builder::new().prefix("ferrochem-load-").tempdir()?;
        let ctx = LoadContext {
            data_dir: &self.data_dir,
            work_dir: scratch.path(),
            featurizer: self.featurizer.as_ref(),
            fetcher,
        };
        let dataset = loader.create_dataset(&ctx)?;
        let work = scratch.path().join("transformed");

        let (datasets, transformers) = match &self.splitter {
            None => {
                let transformers = self.fit(dataset.as_ref())?;
                let out = save_folder.join(DATASET_DIR);
                let dataset = apply(&transformers, dataset.as_ref(), &work, &out)?;
                (Datasets::Single(Box::new(dataset)), transformers)
            }
            Some(splitter) => {
                tracing::info!("Splitting {} with the {} splitter", name, splitter.name());
                let split_dir = scratch.path().join("split");
                let (train, valid, test) = splitter.train_valid_test_split(
                    dataset.as_ref(),
                    self.fractions,
                    self.seed,
                    &split_dir.join(TRAIN_DIR),
                    &split_dir.join(VALID_DIR),
                    &split_dir.join(TEST_DIR),
                )?;
                let transformers = self.fit(&train)?;
                let train = apply(&transformers, &train, &work, &save_folder.join(TRAIN_DIR))?;
                let valid = apply(&transformers, &valid, &work, &save_folder.join(VALID_DIR))?;
                let test = apply(&transformers, &test, &work, &save_folder.join(TEST_DIR))?;
                (Datasets::Split { train, valid, test }, transformers)
            }
        };

        if self.reload {
            write_json(&save_folder.join(TRANSFORMERS_FILE), &transformers)?;
            write_json(&save_folder.join(SETTINGS_FILE), &self.settings())?;
            tracing::info!("Cached {} to {}", name, save_folder.display());
        }
        Ok((tasks, datasets, transformers))
    }

    fn fit(&self, dataset: &dyn Dataset) -> Result<Vec<FittedTransformer>> {
        self.transformers
            .iter()
            .map(|generator| generator.create_transformer(dataset))
            .collect()
    }

    /// The cached datasets, if the save folder is complete and was built with the same settings.
    fn load_cached(&self, save_folder: &Path) -> Result<Option<(Datasets, Vec<FittedTransformer>)>> {
        let transformers_path = save_folder.join(TRANSFORMERS_FILE);
        let settings_path = save_folder.join(SETTINGS_FILE);
        let dirs: &[&str] = match self.splitter {
            Some(_) => &[TRAIN_DIR, VALID_DIR, TEST_DIR],
            None => &[DATASET_DIR],
        };
        let complete = dirs
            .iter()
            .all(|dir| DiskDataset::exists(save_folder.join(dir)))
            && transformers_path.is_file()
            && settings_path.is_file();
        if !complete {
            return Ok(None);
        }

        let cached: CacheSettings = read_json(&settings_path)?;
        let wanted = self.settings();
        if !cached.matches(&wanted) {
            tracing::warn!(
                "Cache in {} was built with {:?}, rebuilding for {:?}",
                save_folder.display(),
                cached,
                wanted
            );
            return Ok(None);
        }

        let transformers: Vec<FittedTransformer> = read_json(&transformers_path)?;
        let datasets = match self.splitter {
            Some(_) => Datasets::Split {
                train: DiskDataset::open(save_folder.join(TRAIN_DIR))?,
                valid: DiskDataset::open(save_folder.join(VALID_DIR))?,
                test: DiskDataset::open(save_folder.join(TEST_DIR))?,
            },
            None => Datasets::Single(Box::new(DiskDataset::open(save_folder.join(DATASET_DIR))?)),
        };
        Ok(Some((datasets, transformers)))
    }
}

/// Drop the cache markers before the datasets under `save_folder` are rewritten.
fn invalidate(save_folder: &Path) -> Result<()> {
    for file in [SETTINGS_FILE, TRANSFORMERS_FILE] {
        let path = save_folder.join(file);
        if path.is_file() {
            fs::remove_file(&path).with_context(|| format!("Cannot remove '{}'", path.display()))?;
        }
    }
    Ok(())
}

/// Apply `transformers` in order; the final dataset is written to `out_dir`.
fn apply(
    transformers: &[FittedTransformer],
    dataset: &dyn Dataset,
    work_dir: &Path,
    out_dir: &Path,
) -> Result<DiskDataset> {
    let mut current = DiskDataset::from_dataset(dataset, work_dir.join("step-0"))?;
    for (step, transformer) in transformers.iter().enumerate() {
        tracing::debug!("Applying the {} transformer", transformer.name());
        current = transformer.transform(&current, &work_dir.join(format!("step-{}", step + 1)))?;
    }
    DiskDataset::from_dataset(&current, out_dir)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).with_context(|| format!("Cannot read '{}'", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Malformed '{}'", path.display()))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Cannot write '{}'", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)
        .with_context(|| format!("Cannot write '{}'", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SplitterSpec, TransformerSpec};
    use ferrochem_core::{Features, Label, MemoryDataset, Sample, TransformerKind};
    use std::cell::Cell;

    struct Counting {
        n: usize,
        builds: Cell<usize>,
    }

    impl DatasetLoader for Counting {
        fn name(&self) -> String {
            "counting".to_string()
        }
        fn tasks(&self) -> Vec<String> {
            vec!["y".to_string()]
        }
        fn create_dataset(&self, _ctx: &LoadContext) -> Result<Box<dyn Dataset>> {
            self.builds.set(self.builds.get() + 1);
            let samples = (0..self.n)
                .map(|i| Sample::new(Features::Empty, Label::Count(i as i64), format!("s{}", i)))
                .collect();
            Ok(Box::new(MemoryDataset::new(samples, self.tasks())?))
        }
    }

    struct NoFetch;

    impl Fetcher for NoFetch {
        fn fetch(&self, url: &str, _dest_dir: &Path) -> Result<PathBuf> {
            anyhow::bail!("unexpected fetch of {}", url)
        }
    }

    fn counting(n: usize) -> Counting {
        Counting {
            n,
            builds: Cell::new(0),
        }
    }

    #[test]
    fn test_save_folder_layout() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let loader = MolnetLoader::new(
            LoaderConfig::builder()
                .save_dir(dir.path())
                .data_dir(dir.path())
                .build(),
        )?;
        assert_eq!(
            loader.save_folder("bbbc001"),
            dir.path()
                .join("bbbc001-featurized")
                .join("UserDefinedFeaturizer")
                .join("index")
        );
        let unsplit = MolnetLoader::new(
            LoaderConfig::builder()
                .save_dir(dir.path())
                .splitter(SplitterSpec::Unsplit)
                .build(),
        )?;
        assert!(unsplit.save_folder("x").ends_with("nosplit"));
        let transformed = MolnetLoader::new(
            LoaderConfig::builder()
                .save_dir(dir.path())
                .transformers(vec!["normalization".into(), "log".into()])
                .build(),
        )?;
        assert!(transformed
            .save_folder("x")
            .ends_with("index/normalization_log"));
        Ok(())
    }

    #[test]
    fn test_cache_keyed_by_transformers() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = |transformers: Vec<TransformerSpec>| {
            LoaderConfig::builder()
                .save_dir(dir.path().join("save"))
                .data_dir(dir.path().join("raw"))
                .transformers(transformers)
                .build()
        };
        let source = counting(10);
        let (_, _, plain) = MolnetLoader::new(config(vec![]))?.load_dataset(&source, &NoFetch)?;
        assert!(plain.is_empty());

        let (_, datasets, fitted) = MolnetLoader::new(config(vec!["normalization".into()]))?
            .load_dataset(&source, &NoFetch)?;
        assert_eq!(source.builds.get(), 2);
        assert_eq!(fitted.len(), 1);
        let (train, _, _) = datasets.split().unwrap();
        let mean: f64 = train.labels()?.iter().filter_map(Label::as_f64).sum::<f64>() / 8.0;
        assert!(mean.abs() < 1e-9);

        // both variants stay cached side by side
        MolnetLoader::new(config(vec![]))?.load_dataset(&source, &NoFetch)?;
        assert_eq!(source.builds.get(), 2);
        Ok(())
    }

    #[test]
    fn test_changed_seed_or_fractions_rebuild() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = |seed: u64, train: f64| {
            LoaderConfig::builder()
                .save_dir(dir.path().join("save"))
                .data_dir(dir.path().join("raw"))
                .splitter("random")
                .seed(seed)
                .fractions(SplitFractions {
                    train,
                    valid: (1.0 - train) / 2.0,
                    test: (1.0 - train) / 2.0,
                })
                .build()
        };
        let source = counting(20);
        MolnetLoader::new(config(1, 0.8))?.load_dataset(&source, &NoFetch)?;
        MolnetLoader::new(config(1, 0.8))?.load_dataset(&source, &NoFetch)?;
        assert_eq!(source.builds.get(), 1);

        MolnetLoader::new(config(2, 0.8))?.load_dataset(&source, &NoFetch)?;
        assert_eq!(source.builds.get(), 2);

        let (_, datasets, _) = MolnetLoader::new(config(2, 0.6))?.load_dataset(&source, &NoFetch)?;
        assert_eq!(source.builds.get(), 3);
        let (train, valid, test) = datasets.split().unwrap();
        assert_eq!((train.len(), valid.len(), test.len()), (12, 4, 4));
        Ok(())
    }

    #[test]
    fn test_outputs_live_under_save_dir() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = LoaderConfig::builder()
            .save_dir(dir.path().join("save"))
            .data_dir(dir.path().join("raw"))
            .transformers(vec!["normalization".into()])
            .reload(false)
            .build();
        let loader = MolnetLoader::new(config)?;
        let (_, datasets, _) = loader.load_dataset(&counting(10), &NoFetch)?;
        let (train, valid, test) = datasets.split().unwrap();
        for ds in [train, valid, test] {
            assert!(ds.data_dir().starts_with(loader.save_folder("counting")));
        }
        // without reload nothing marks the folder as a usable cache
        assert!(!loader.save_folder("counting").join(SETTINGS_FILE).exists());
        Ok(())
    }

    #[test]
    fn test_second_load_hits_cache() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = || {
            LoaderConfig::builder()
                .save_dir(dir.path().join("save"))
                .data_dir(dir.path().join("raw"))
                .transformers(vec![TransformerKind::Normalization.into()])
                .build()
        };
        let source = counting(10);
        let (tasks, first, fitted) = MolnetLoader::new(config())?.load_dataset(&source, &NoFetch)?;
        assert_eq!(tasks, vec!["y"]);
        assert_eq!(fitted.len(), 1);
        let (train, valid, test) = first.split().unwrap();
        assert_eq!((train.len(), valid.len(), test.len()), (8, 1, 1));

        let (_, second, refitted) = MolnetLoader::new(config())?.load_dataset(&source, &NoFetch)?;
        assert_eq!(source.builds.get(), 1);
        assert_eq!(fitted, refitted);
        for (a, b) in first.all().into_iter().zip(second.all()) {
            assert_eq!(a.samples()?, b.samples()?);
        }
        Ok(())
    }

    #[test]
    fn test_transformers_fitted_on_train() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = LoaderConfig::builder()
            .save_dir(dir.path())
            .data_dir(dir.path())
            .transformers(vec!["normalization".into()])
            .reload(false)
            .build();
        let (_, datasets, fitted) =
            MolnetLoader::new(config)?.load_dataset(&counting(10), &NoFetch)?;
        match &fitted[0] {
            FittedTransformer::Normalization(t) => assert!((t.mean - 3.5).abs() < 1e-9),
            other => panic!("unexpected {:?}", other),
        }
        let (train, _, _) = datasets.split().unwrap();
        let mean: f64 = train
            .labels()?
            .iter()
            .filter_map(Label::as_f64)
            .sum::<f64>()
            / train.len() as f64;
        assert!(mean.abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_unsplit_returns_single_dataset() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = || {
            LoaderConfig::builder()
                .save_dir(dir.path())
                .data_dir(dir.path())
                .splitter(SplitterSpec::Unsplit)
                .build()
        };
        let source = counting(5);
        let (_, datasets, _) = MolnetLoader::new(config())?.load_dataset(&source, &NoFetch)?;
        match datasets {
            Datasets::Single(ds) => assert_eq!(ds.len(), 5),
            Datasets::Split { .. } => panic!("expected a single dataset"),
        }
        assert!(DiskDataset::exists(
            dir.path()
                .join("counting-featurized")
                .join("UserDefinedFeaturizer")
                .join("nosplit")
                .join(DATASET_DIR)
        ));

        let (_, again, _) = MolnetLoader::new(config())?.load_dataset(&source, &NoFetch)?;
        assert_eq!(source.builds.get(), 1);
        assert_eq!(again.all()[0].len(), 5);
        Ok(())
    }

    #[test]
    fn test_bad_fractions_rejected() {
        let config = LoaderConfig::builder()
            .fractions(SplitFractions {
                train: 0.5,
                valid: 0.1,
                test: 0.1,
            })
            .build();
        assert!(MolnetLoader::new(config).is_err());
    }
}
