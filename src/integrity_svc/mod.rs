pub mod error;

use std::{fs::File, io::BufReader, path::{Path, PathBuf}};

use flate2::read::GzDecoder;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::debug;

use error::*;

/// Number of entry names kept for diagnostics
pub const SAMPLE_ENTRIES: usize = 12;

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct VerificationReport {
    pub entry_count: usize,
    pub sample_entries: Vec<String>,
    /// Hex SHA-256 of the archive file bytes
    pub checksum: String,
}

///
/// Walks the archive's entry list without extracting anything, then
/// checksums the archive bytes. An archive with no entries is never a
/// valid backup
///
pub async fn verify(archive_path: &Path) -> Result<VerificationReport> {
    let path = archive_path.to_path_buf();
    let (entry_count, sample_entries) = tokio::task::spawn_blocking(move || list_entries(&path)).await??;
    if entry_count == 0 {
        return Err(Error::EmptyArchive);
    }

    let checksum = checksum_file(archive_path).await?;
    debug!(archive = %archive_path.display(), entry_count, checksum = %checksum, "archive verified");

    Ok(VerificationReport { entry_count, sample_entries, checksum })
}

///
/// Generates a hex SHA-256 of the file found at `path`, read in chunks
///
pub async fn checksum_file(path: &Path) -> Result<String> {
    let file = tokio::fs::File::open(path).await?;
    let mut file_reader = tokio::io::BufReader::new(file);

    // The hash, built up while the file is being read
    let mut hasher = Sha256::new();
    let mut bytes = vec![0u8; 64 * 1024];
    loop {
        let n = file_reader.read(&mut bytes).await?;
        if n == 0 { break; }
        hasher.update(&bytes[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

fn list_entries(archive_path: &PathBuf) -> Result<(usize, Vec<String>)> {
    let file = BufReader::new(File::open(archive_path)?);
    let mut archive = tar::Archive::new(GzDecoder::new(file));

    let mut count = 0;
    let mut samples = Vec::with_capacity(SAMPLE_ENTRIES);
    let entries = archive.entries().map_err(|e| Error::Unreadable(e.to_string()))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::Unreadable(e.to_string()))?;
        if samples.len() < SAMPLE_ENTRIES {
            let name = entry.path().map_err(|e| Error::Unreadable(e.to_string()))?;
            samples.push(name.to_string_lossy().to_string());
        }
        count += 1;
    }

    Ok((count, samples))
}

#[cfg(test)]
mod tests {
    use std::{fs::File, io::Write};

    use flate2::{write::GzEncoder, Compression};
    use tempfile::tempdir;

    use super::{checksum_file, error::Error, verify, SAMPLE_ENTRIES};
    use crate::archive_svc::create_archive;

    #[tokio::test]
    async fn test_three_files_report_three_entries() {
        let source = tempdir().unwrap();
        for name in ["a.txt", "b.txt", "c.txt"] {
            std::fs::write(source.path().join(name), name.as_bytes()).unwrap();
        }
        let out = tempdir().unwrap();
        let archive = create_archive(source.path(), out.path(), "three.tar.gz").await.unwrap();

        let first = verify(&archive).await.unwrap();
        let second = verify(&archive).await.unwrap();

        assert_eq!(first.entry_count, 3);
        assert_eq!(first.sample_entries, vec!["a.txt", "b.txt", "c.txt"]);
        assert_eq!(first.checksum, second.checksum);
        assert_eq!(first.checksum.len(), 64);
    }

    #[tokio::test]
    async fn test_samples_are_capped() {
        let source = tempdir().unwrap();
        for i in 0..30 {
            std::fs::write(source.path().join(format!("f{:02}", i)), b"x").unwrap();
        }
        let out = tempdir().unwrap();
        let archive = create_archive(source.path(), out.path(), "many.tar.gz").await.unwrap();

        let report = verify(&archive).await.unwrap();
        assert_eq!(report.entry_count, 30);
        assert_eq!(report.sample_entries.len(), SAMPLE_ENTRIES);
    }

    #[tokio::test]
    async fn test_empty_archive_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.tar.gz");
        let gz = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        let builder = tar::Builder::new(gz);
        builder.into_inner().unwrap().finish().unwrap().flush().unwrap();

        assert!(matches!(verify(&path).await, Err(Error::EmptyArchive)));
    }

    #[tokio::test]
    async fn test_checksum_of_known_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("abc");
        std::fs::write(&path, b"abc").unwrap();

        assert_eq!(
            checksum_file(&path).await.unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
