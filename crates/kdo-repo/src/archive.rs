//! Chart archive extraction

use std::io::Cursor;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use kdo_core::chart::CHART_FILE;
use tar::Archive;

use crate::error::{RepoError, Result};

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Archive formats, told apart by content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    Zip,
}

impl ArchiveFormat {
    pub fn detect(data: &[u8]) -> Option<Self> {
        if data.starts_with(GZIP_MAGIC) {
            Some(Self::TarGz)
        } else if data.starts_with(ZIP_MAGIC) {
            Some(Self::Zip)
        } else {
            None
        }
    }
}

/// Extract `data` into `dest` and return the chart directory inside it
pub fn extract(data: &[u8], dest: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dest)?;
    match ArchiveFormat::detect(data) {
        Some(ArchiveFormat::TarGz) => {
            let mut archive = Archive::new(GzDecoder::new(Cursor::new(data)));
            archive.unpack(dest)?;
        }
        Some(ArchiveFormat::Zip) => {
            let mut archive = zip::ZipArchive::new(Cursor::new(data))?;
            archive.extract(dest)?;
        }
        None => {
            return Err(RepoError::Archive {
                message: "expected a gzip or zip archive".to_string(),
            });
        }
    }
    chart_root(dest)
}

/// The directory holding `Chart.yaml`: `dir` itself, or its only
/// sub-directory when the archive wraps the chart in one
pub fn chart_root(dir: &Path) -> Result<PathBuf> {
    if dir.join(CHART_FILE).exists() {
        return Ok(dir.to_path_buf());
    }
    let entries = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect::<Vec<_>>();
    match entries.as_slice() {
        [only] if only.is_dir() => Ok(only.clone()),
        _ => Err(RepoError::NotFound {
            path: dir.display().to_string(),
        }),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;

    pub(crate) const CHART: &str = "name: uaa\nversion: 1.3.4\n";

    pub(crate) fn tgz(prefix: &str) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, content) in [("Chart.yaml", CHART), ("values.yaml", "replicas: 1\n")] {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, format!("{}{}", prefix, path), content.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    pub(crate) fn zip(prefix: &str) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file(format!("{}Chart.yaml", prefix), options).unwrap();
        writer.write_all(CHART.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_detect() {
        assert_eq!(ArchiveFormat::detect(&tgz("")), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::detect(&zip("")), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::detect(b"name: uaa"), None);
    }

    #[test]
    fn test_extract_tgz_descends_into_single_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = extract(&tgz("uaa/"), dir.path()).unwrap();
        assert_eq!(root, dir.path().join("uaa"));
        assert!(root.join("values.yaml").exists());
    }

    #[test]
    fn test_extract_flat_zip() {
        let dir = tempfile::tempdir().unwrap();
        let root = extract(&zip(""), dir.path()).unwrap();
        assert_eq!(root, dir.path());
    }

    #[test]
    fn test_extract_rejects_unknown_content() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            extract(b"<html>", dir.path()),
            Err(RepoError::Archive { .. })
        ));
    }
}
