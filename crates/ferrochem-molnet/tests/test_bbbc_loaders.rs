use anyhow::Result;
use ferrochem_core::{Dataset, Features, Label, LabelKind};
use ferrochem_io::Fetcher;
use ferrochem_molnet::{
    load_bbbc001_with_fetcher, load_bbbc002_with_fetcher, load_bbbc004_with_fetcher, Datasets,
    LoaderConfig, LoaderError, SplitterSpec,
};
use ferrochem_test_data::{RemoteFixtures, TestFile};
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Serves files from a local "remote" directory and records every requested URL.
struct CountingFetcher {
    remote: TempDir,
    urls: RefCell<Vec<String>>,
}

impl CountingFetcher {
    fn new(populate: impl FnOnce(&Path) -> std::io::Result<()>) -> Result<Self> {
        let remote = tempfile::tempdir()?;
        populate(remote.path())?;
        Ok(Self {
            remote,
            urls: RefCell::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.urls.borrow().len()
    }
}

impl Fetcher for CountingFetcher {
    fn fetch(&self, url: &str, dest_dir: &Path) -> Result<PathBuf> {
        self.urls.borrow_mut().push(url.to_string());
        let name = url.rsplit('/').next().unwrap_or(url);
        let dest = dest_dir.join(name);
        fs::copy(self.remote.path().join(name), &dest)?;
        Ok(dest)
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config(dir: &Path) -> LoaderConfig {
    LoaderConfig::builder()
        .data_dir(dir.join("raw"))
        .save_dir(dir.join("save"))
        .build()
}

fn unsplit(dir: &Path) -> LoaderConfig {
    LoaderConfig::builder()
        .data_dir(dir.join("raw"))
        .save_dir(dir.join("save"))
        .splitter(SplitterSpec::Unsplit)
        .build()
}

fn single(datasets: Datasets) -> Box<dyn Dataset> {
    match datasets {
        Datasets::Single(ds) => ds,
        Datasets::Split { .. } => panic!("expected an unsplit dataset"),
    }
}

fn counts(ds: &dyn Dataset) -> Result<Vec<i64>> {
    Ok(ds
        .labels()?
        .into_iter()
        .map(|l| match l {
            Label::Count(c) => c,
            other => panic!("expected a count, got {:?}", other),
        })
        .collect())
}

#[test]
fn test_bbbc001_labels_are_truncated_means() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let fetcher = CountingFetcher::new(RemoteFixtures::bbbc001)?;
    let (tasks, datasets, transformers) = load_bbbc001_with_fetcher(unsplit(dir.path()), &fetcher)?;
    assert_eq!(tasks, vec!["cell-count"]);
    assert!(transformers.is_empty());
    let ds = single(datasets);
    assert_eq!(ds.len(), 6);
    // labels pair with images in sorted file order
    assert_eq!(counts(ds.as_ref())?, TestFile::bbbc001_expected_labels());
    assert_eq!(ds.sample(0)?.id, "img_00.png");
    assert!(matches!(ds.sample(0)?.x, Features::Image(_)));
    assert_eq!(fetcher.calls(), 2);
    Ok(())
}

#[test]
fn test_bbbc002_labels() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let fetcher = CountingFetcher::new(RemoteFixtures::bbbc002)?;
    let (_, datasets, _) = load_bbbc002_with_fetcher(unsplit(dir.path()), &fetcher)?;
    let ds = single(datasets);
    assert_eq!(counts(ds.as_ref())?, TestFile::bbbc002_expected_labels());
    assert_eq!(
        fetcher.urls.borrow()[1],
        "https://data.broadinstitute.org/bbbc/BBBC002/BBBC002_v1_counts.txt"
    );
    Ok(())
}

#[test]
fn test_reload_uses_cache() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let fetcher = CountingFetcher::new(RemoteFixtures::bbbc001)?;

    let (_, first, _) = load_bbbc001_with_fetcher(config(dir.path()), &fetcher)?;
    assert_eq!(fetcher.calls(), 2);
    // remove the raw files: a cache hit must not need them
    fs::remove_dir_all(dir.path().join("raw"))?;

    let (_, second, _) = load_bbbc001_with_fetcher(config(dir.path()), &fetcher)?;
    assert_eq!(fetcher.calls(), 2);

    let (train, valid, test) = second.split().expect("split datasets");
    assert_eq!((train.len(), valid.len(), test.len()), (4, 1, 1));
    for (a, b) in first.all().into_iter().zip(second.all()) {
        assert_eq!(a.samples()?, b.samples()?);
    }
    Ok(())
}

#[test]
fn test_raw_files_fetched_once_without_reload() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let fetcher = CountingFetcher::new(RemoteFixtures::bbbc002)?;
    let no_cache = || {
        LoaderConfig::builder()
            .data_dir(dir.path().join("raw"))
            .save_dir(dir.path().join("save"))
            .reload(false)
            .build()
    };
    load_bbbc002_with_fetcher(no_cache(), &fetcher)?;
    let (_, datasets, _) = load_bbbc002_with_fetcher(no_cache(), &fetcher)?;
    assert_eq!(fetcher.calls(), 2);
    // the returned datasets outlive the load's scratch space
    let (train, _, _) = datasets.split().expect("split datasets");
    assert!(train.data_dir().starts_with(dir.path().join("save")));
    assert_eq!(train.samples()?.len(), train.len());
    Ok(())
}

#[test]
fn test_bbbc004_invalid_overlap_fails_before_fetch() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let fetcher = CountingFetcher::new(|_| Ok(()))?;
    let err = load_bbbc004_with_fetcher(0.2, false, config(dir.path()), &fetcher)
        .err()
        .expect("0.2 is not a valid overlap");
    match err.downcast_ref::<LoaderError>() {
        Some(LoaderError::InvalidOverlapProbability { value, valid }) => {
            assert_eq!(*value, 0.2);
            assert_eq!(valid, &vec![0.0, 0.15, 0.3, 0.45, 0.6]);
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(fetcher.calls(), 0);
    assert!(!dir.path().join("raw").exists());
    Ok(())
}

#[test]
fn test_bbbc004_every_overlap_loads() -> Result<()> {
    for (p, code) in [(0.0, "00"), (0.15, "15"), (0.3, "30"), (0.45, "45"), (0.6, "60")] {
        let dir = tempfile::tempdir()?;
        let fetcher = CountingFetcher::new(|remote| RemoteFixtures::bbbc004(remote, code))?;
        let (_, datasets, _) = load_bbbc004_with_fetcher(p, false, config(dir.path()), &fetcher)?;
        assert!(datasets.split().is_some());
        assert!(dir
            .path()
            .join("raw")
            .join(format!("BBBC004_v1_0{}_images.zip", code))
            .is_file());
    }
    Ok(())
}

#[test]
fn test_bbbc004_count_mode() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let fetcher = CountingFetcher::new(|remote| RemoteFixtures::bbbc004(remote, "30"))?;
    let (_, datasets, _) = load_bbbc004_with_fetcher(0.3, false, unsplit(dir.path()), &fetcher)?;
    let ds = single(datasets);
    assert_eq!(ds.len(), 20);
    assert_eq!(ds.label_kind(), Some(LabelKind::Scalar));
    assert!(counts(ds.as_ref())?.iter().all(|&c| c == 300));
    // count mode never downloads the masks
    assert_eq!(fetcher.calls(), 1);
    Ok(())
}

#[test]
fn test_bbbc004_segmentation_mode() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let fetcher = CountingFetcher::new(|remote| RemoteFixtures::bbbc004(remote, "00"))?;
    let (_, datasets, _) = load_bbbc004_with_fetcher(0.0, true, unsplit(dir.path()), &fetcher)?;
    let ds = single(datasets);
    assert_eq!(ds.len(), 20);
    assert_eq!(ds.label_kind(), Some(LabelKind::Mask));
    for sample in ds.samples()? {
        let Label::Mask(mask) = &sample.y else {
            panic!("expected a mask label");
        };
        assert!(mask.is_file());
        // archive order is kept, so image and mask indices line up
        let mask_name = mask.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(mask_name.replace("fg_", "img_"), sample.id);
    }
    assert_eq!(fetcher.calls(), 2);
    Ok(())
}

#[test]
fn test_bbbc004_modes_share_save_dir() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let fetcher = CountingFetcher::new(|remote| RemoteFixtures::bbbc004(remote, "30"))?;

    let (_, counted, _) = load_bbbc004_with_fetcher(0.3, false, config(dir.path()), &fetcher)?;
    let (train, _, _) = counted.split().expect("split datasets");
    assert_eq!(train.label_kind(), Some(LabelKind::Scalar));

    let (_, segmented, _) = load_bbbc004_with_fetcher(0.3, true, config(dir.path()), &fetcher)?;
    for ds in segmented.all() {
        assert_eq!(ds.label_kind(), Some(LabelKind::Mask));
    }
    // the images archive is reused; only the masks are new
    assert_eq!(fetcher.calls(), 2);
    Ok(())
}

#[test]
fn test_bbbc004_split_and_normalize() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let fetcher = CountingFetcher::new(|remote| RemoteFixtures::bbbc004(remote, "60"))?;
    let config = LoaderConfig::builder()
        .data_dir(dir.path().join("raw"))
        .save_dir(dir.path().join("save"))
        .splitter("random")
        .seed(3)
        .transformers(vec!["minmax".into()])
        .build();
    let (_, datasets, transformers) = load_bbbc004_with_fetcher(0.6, false, config, &fetcher)?;
    assert_eq!(transformers.len(), 1);
    let (train, valid, test) = datasets.split().expect("split datasets");
    assert_eq!(train.len() + valid.len() + test.len(), 20);
    assert_eq!(train.len(), 16);
    // constant counts map to 0 under minmax
    assert!(train.labels()?.iter().all(|l| l.as_f64() == Some(0.0)));
    Ok(())
}
