//! ferrochem-test-data
//!
//! Test fixtures for the other crates in the workspace.
//!
//! Small text fixtures (label tables, XYZ coordinates) are embedded in the crate as `TestFile`s
//! and written to temporary files. Image archives are generated on the fly as `TestArchive`s:
//! zips of tiny grayscale PNGs.
use image::{GrayImage, ImageFormat, Luma};
use std::fs::{self, File};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tempfile::{Builder, NamedTempFile};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

#[derive(Debug)]
/// Test File
///
/// Example usage:
///
/// ```ignore
/// // returns (filepath, _tempfile_handle).
/// // _handle ensures the tempfile remains in scope
/// use ferrochem_test_data::TestFile;
/// let (counts, _temp) = TestFile::bbbc001_counts().create_temp().unwrap();
/// ```
pub struct TestFile {
    filebinary: &'static [u8],
    suffix: &'static str,
}

impl TestFile {
    /// Six-row BBBC001-style table with two annotator columns.
    pub fn bbbc001_counts() -> Self {
        Self {
            filebinary: include_bytes!("../data/labels/BBBC001_v1_counts.txt"),
            suffix: "txt",
        }
    }
    /// Labels expected from [`TestFile::bbbc001_counts`].
    pub fn bbbc001_expected_labels() -> Vec<i64> {
        vec![401, 291, 327, 356, 309, 350]
    }
    /// Five-row BBBC002-style table.
    pub fn bbbc002_counts() -> Self {
        Self {
            filebinary: include_bytes!("../data/labels/BBBC002_v1_counts.txt"),
            suffix: "txt",
        }
    }
    pub fn bbbc002_expected_labels() -> Vec<i64> {
        vec![27, 25, 32, 20, 41]
    }
    pub fn water_xyz() -> Self {
        Self {
            filebinary: include_bytes!("../data/molecules/water.xyz"),
            suffix: "xyz",
        }
    }
    pub fn methane_xyz() -> Self {
        Self {
            filebinary: include_bytes!("../data/molecules/methane.xyz"),
            suffix: "xyz",
        }
    }

    pub fn contents(&self) -> &'static str {
        std::str::from_utf8(self.filebinary).unwrap_or_default()
    }

    pub fn create_temp(&self) -> std::io::Result<(String, NamedTempFile)> {
        let temp = Builder::new()
            .suffix(&format!(".{}", self.suffix))
            .tempfile()?;

        fs::write(&temp, self.filebinary)?;
        let path = temp.path().to_string_lossy().into_owned();

        Ok((path, temp))
    }

    /// Write the fixture under an exact file name.
    pub fn write_as(&self, path: &Path) -> std::io::Result<PathBuf> {
        fs::write(path, self.filebinary)?;
        Ok(path.to_path_buf())
    }
}

/// A zip of `count` PNG images named `<prefix>_00.png`, `<prefix>_01.png`, ...
///
/// Entries are written in reverse name order so that sorted and unsorted loads differ.
#[derive(Debug, Clone)]
pub struct TestArchive {
    prefix: &'static str,
    count: usize,
}

impl TestArchive {
    pub const WIDTH: usize = 8;
    pub const HEIGHT: usize = 6;

    pub fn new(prefix: &'static str, count: usize) -> Self {
        Self { prefix, count }
    }

    pub fn entry_name(&self, index: usize) -> String {
        format!("{}_{:02}.png", self.prefix, index)
    }

    fn png(index: usize) -> std::io::Result<Vec<u8>> {
        let img = GrayImage::from_fn(Self::WIDTH as u32, Self::HEIGHT as u32, |x, y| {
            Luma([((x + y) as usize * 16 + index) as u8])
        });
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .map_err(std::io::Error::other)?;
        Ok(buf)
    }

    pub fn write_zip(&self, path: &Path) -> std::io::Result<PathBuf> {
        let mut zip = ZipWriter::new(File::create(path)?);
        for index in (0..self.count).rev() {
            zip.start_file(self.entry_name(index), SimpleFileOptions::default())?;
            zip.write_all(&Self::png(index)?)?;
        }
        zip.finish()?;
        Ok(path.to_path_buf())
    }
}

/// Populate `dir` with the files a BBBC loader would download, under their published names.
pub struct RemoteFixtures;

impl RemoteFixtures {
    pub fn bbbc001(dir: &Path) -> std::io::Result<()> {
        TestArchive::new("img", 6).write_zip(&dir.join("BBBC001_v1_images_tif.zip"))?;
        TestFile::bbbc001_counts().write_as(&dir.join("BBBC001_v1_counts.txt"))?;
        Ok(())
    }

    pub fn bbbc002(dir: &Path) -> std::io::Result<()> {
        TestArchive::new("img", 5).write_zip(&dir.join("BBBC002_v1_images.zip"))?;
        TestFile::bbbc002_counts().write_as(&dir.join("BBBC002_v1_counts.txt"))?;
        Ok(())
    }

    /// `code` is the two-digit overlap code, e.g. `"00"` or `"45"`.
    pub fn bbbc004(dir: &Path, code: &str) -> std::io::Result<()> {
        TestArchive::new("img", 20).write_zip(&dir.join(format!("BBBC004_v1_0{}_images.zip", code)))?;
        TestArchive::new("fg", 20)
            .write_zip(&dir.join(format!("BBBC004_v1_0{}_foreground.zip", code)))?;
        Ok(())
    }
}
