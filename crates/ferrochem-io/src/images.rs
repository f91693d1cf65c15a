//! Image datasets.
//!
//! [`ImageLoader`] turns a zip archive, a directory or a single image into a dataset. Each image
//! is paired either with an integer count or with a segmentation-mask image taken, in the same
//! order, from a second archive.
//!
//! Archives are extracted next to themselves (`foo.zip` -> `foo/`) once. The entry order is
//! recorded in `foo/.extracted` so unsorted loads see archive order on every call.
use anyhow::{bail, Context, Result};
use ferrochem_core::{Dataset, DiskDataset, Features, Label, MemoryDataset, Sample};
use ndarray::{Array2, Array3, ArrayD};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const IMAGE_EXTENSIONS: [&str; 7] = ["png", "tif", "tiff", "jpg", "jpeg", "bmp", "gif"];
const EXTRACTED_MARKER: &str = ".extracted";

#[derive(Debug, Clone, PartialEq)]
pub enum ImageLabels {
    /// One count per image, in image order.
    Counts(Vec<i64>),
    /// Archive, directory or file holding one mask per image.
    Masks(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageInputs {
    pub images: PathBuf,
    pub labels: ImageLabels,
}

impl ImageInputs {
    pub fn with_counts(images: impl Into<PathBuf>, counts: Vec<i64>) -> Self {
        Self {
            images: images.into(),
            labels: ImageLabels::Counts(counts),
        }
    }

    pub fn with_masks(images: impl Into<PathBuf>, masks: impl Into<PathBuf>) -> Self {
        Self {
            images: images.into(),
            labels: ImageLabels::Masks(masks.into()),
        }
    }
}

fn is_image(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .map_or(true, |n| n.starts_with('.'));
    !hidden
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

fn is_zip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
}

/// Extract `archive` beside itself and return the extracted files in archive order.
fn extract_zip(archive: &Path) -> Result<Vec<PathBuf>> {
    let dest = archive.with_extension("");
    let marker = dest.join(EXTRACTED_MARKER);
    if marker.is_file() {
        tracing::debug!("{} already extracted", archive.display());
        let listing = fs::read_to_string(&marker)?;
        return Ok(listing.lines().map(|rel| dest.join(rel)).collect());
    }

    tracing::info!("Extracting {}", archive.display());
    let file =
        File::open(archive).with_context(|| format!("Cannot open '{}'", archive.display()))?;
    let mut zip = zip::ZipArchive::new(file)
        .with_context(|| format!("'{}' is not a zip archive", archive.display()))?;
    fs::create_dir_all(&dest)?;

    let mut entries = Vec::new();
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let Some(rel) = entry.enclosed_name() else {
            tracing::warn!("Skipping unsafe archive entry '{}'", entry.name());
            continue;
        };
        if rel.starts_with("__MACOSX") {
            continue;
        }
        let out = dest.join(&rel);
        if entry.is_dir() {
            fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer =
            File::create(&out).with_context(|| format!("Cannot write '{}'", out.display()))?;
        io::copy(&mut entry, &mut writer)?;
        entries.push(rel);
    }

    let listing: Vec<String> = entries
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    fs::write(&marker, listing.join("\n"))?;
    Ok(entries.into_iter().map(|rel| dest.join(rel)).collect())
}

/// Image files under `path`: archive order for zips, file-name order for directories.
fn collect_images(path: &Path) -> Result<Vec<PathBuf>> {
    let files = if path.is_dir() {
        WalkDir::new(path)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect()
    } else if is_zip(path) {
        extract_zip(path)?
    } else if path.is_file() {
        vec![path.to_path_buf()]
    } else {
        bail!("Image input '{}' does not exist", path.display());
    };
    Ok(files.into_iter().filter(|p| is_image(p)).collect())
}

/// Decode an image into `[height, width]` (grayscale) or `[height, width, 3]` (color),
/// with intensities scaled to `[0, 1]`.
pub fn load_image(path: &Path) -> Result<ArrayD<f32>> {
    let img = image::open(path).with_context(|| format!("Cannot decode '{}'", path.display()))?;
    let (width, height) = (img.width() as usize, img.height() as usize);
    let array = if img.color().has_color() {
        Array3::from_shape_vec((height, width, 3), img.to_rgb32f().into_raw())?.into_dyn()
    } else {
        Array2::from_shape_vec((height, width), img.to_luma32f().into_raw())?.into_dyn()
    };
    Ok(array)
}

/// `cells.zip` becomes `cells-dataset` in the same directory.
fn default_data_dir(images: &Path) -> PathBuf {
    let stem = images
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("images");
    images.with_file_name(format!("{}-dataset", stem))
}

#[derive(Debug, Clone)]
pub struct ImageLoader {
    /// Sort images (and masks) by path before pairing them with labels.
    pub sorting: bool,
    pub tasks: Vec<String>,
    /// Where out-of-core datasets are written; `<images>-dataset` beside the input when unset.
    pub data_dir: Option<PathBuf>,
}

impl Default for ImageLoader {
    fn default() -> Self {
        Self {
            sorting: true,
            tasks: Vec::new(),
            data_dir: None,
        }
    }
}

impl ImageLoader {
    pub fn new(sorting: bool) -> Self {
        Self {
            sorting,
            ..Self::default()
        }
    }

    pub fn with_tasks(mut self, tasks: Vec<String>) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    fn image_files(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut files = collect_images(path)?;
        if self.sorting {
            files.sort();
        }
        Ok(files)
    }

    /// Pair images with labels.
    ///
    /// In memory, pixels are decoded up front into [`Features::Array`]. Out of core, samples hold
    /// [`Features::Image`] references and are written as a [`DiskDataset`].
    pub fn create_dataset(&self, inputs: &ImageInputs, in_memory: bool) -> Result<Box<dyn Dataset>> {
        let images = self.image_files(&inputs.images)?;
        if images.is_empty() {
            bail!("No images found in '{}'", inputs.images.display());
        }

        let labels: Vec<Label> = match &inputs.labels {
            ImageLabels::Counts(counts) => {
                if counts.len() != images.len() {
                    bail!(
                        "{} labels provided for {} images in '{}'",
                        counts.len(),
                        images.len(),
                        inputs.images.display()
                    );
                }
                counts.iter().map(|&c| Label::Count(c)).collect()
            }
            ImageLabels::Masks(masks) => {
                let masks = self.image_files(masks)?;
                if masks.len() != images.len() {
                    bail!(
                        "{} masks found for {} images in '{}'",
                        masks.len(),
                        images.len(),
                        inputs.images.display()
                    );
                }
                masks.into_iter().map(Label::Mask).collect()
            }
        };

        let samples = images
            .into_iter()
            .zip(labels)
            .map(|(path, y)| {
                let id = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let x = if in_memory {
                    Features::Array(load_image(&path)?)
                } else {
                    Features::Image(path)
                };
                Ok(Sample::new(x, y, id))
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::info!(
            "Created image dataset with {} samples ({})",
            samples.len(),
            if in_memory { "in memory" } else { "on disk" }
        );
        if in_memory {
            return Ok(Box::new(MemoryDataset::new(samples, self.tasks.clone())?));
        }
        let dir = match &self.data_dir {
            Some(dir) => dir.clone(),
            None => default_data_dir(&inputs.images),
        };
        Ok(Box::new(DiskDataset::create(
            samples,
            self.tasks.clone(),
            dir,
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrochem_core::LabelKind;
    use ferrochem_test_data::TestArchive;

    #[test]
    fn test_counts_out_of_core() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let archive = TestArchive::new("cell", 4).write_zip(&dir.path().join("cells.zip"))?;
        let loader = ImageLoader::default().with_data_dir(dir.path().join("dataset"));
        let ds = loader.create_dataset(&ImageInputs::with_counts(&archive, vec![1, 2, 3, 4]), false)?;
        assert_eq!(ds.len(), 4);
        assert_eq!(ds.label_kind(), Some(LabelKind::Scalar));
        let first = ds.sample(0)?;
        assert_eq!(first.y, Label::Count(1));
        match first.x {
            Features::Image(path) => assert!(path.is_file()),
            other => panic!("expected an image reference, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_out_of_core_defaults_beside_input() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let archive = TestArchive::new("cell", 2).write_zip(&dir.path().join("cells.zip"))?;
        let ds = ImageLoader::default()
            .create_dataset(&ImageInputs::with_counts(&archive, vec![1, 2]), false)?;
        assert!(DiskDataset::exists(dir.path().join("cells-dataset")));
        assert_eq!(ds.sample(1)?.y, Label::Count(2));
        Ok(())
    }

    #[test]
    fn test_counts_in_memory_decodes_pixels() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let archive = TestArchive::new("cell", 2).write_zip(&dir.path().join("cells.zip"))?;
        let ds = ImageLoader::default()
            .create_dataset(&ImageInputs::with_counts(&archive, vec![5, 6]), true)?;
        match ds.sample(1)?.x {
            Features::Array(a) => assert_eq!(a.shape(), &[TestArchive::HEIGHT, TestArchive::WIDTH]),
            other => panic!("expected pixels, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_masks_pair_in_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let images = TestArchive::new("img", 3).write_zip(&dir.path().join("images.zip"))?;
        let masks = TestArchive::new("mask", 3).write_zip(&dir.path().join("masks.zip"))?;
        let ds = ImageLoader::new(false)
            .with_data_dir(dir.path().join("dataset"))
            .create_dataset(&ImageInputs::with_masks(&images, &masks), false)?;
        assert_eq!(ds.label_kind(), Some(LabelKind::Mask));
        // unsorted: archive order, which is reversed in the fixture
        let s = ds.sample(2)?;
        assert_eq!(s.id, "img_00.png");
        match s.y {
            Label::Mask(p) => assert!(p.ends_with("mask_00.png")),
            other => panic!("expected a mask, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_label_count_mismatch() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let archive = TestArchive::new("cell", 3).write_zip(&dir.path().join("cells.zip"))?;
        let result = ImageLoader::default().create_dataset(&ImageInputs::with_counts(&archive, vec![1]), true);
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn test_extraction_is_reused() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let archive = TestArchive::new("cell", 2).write_zip(&dir.path().join("cells.zip"))?;
        let first = collect_images(&archive)?;
        fs::remove_file(&archive)?;
        // the listing survives without the archive
        assert!(extract_zip(&archive).is_ok());
        assert_eq!(extract_zip(&archive)?, first);
        Ok(())
    }
}
