pub mod error;

use std::{fs::File, io::{BufReader, BufWriter}, path::{Path, PathBuf}};

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use tar::{Archive, Builder, HeaderMode};
use tracing::debug;
use walkdir::WalkDir;

use self::error::*;

///
/// Packages the tree rooted at `source_dir` into `<output_dir>/<archive_name>`,
/// a gzip-compressed tar whose entry names are relative to `source_dir`.
/// Returns the path of the written archive
///
pub async fn create_archive(source_dir: &Path, output_dir: &Path, archive_name: &str) -> Result<PathBuf> {
    tokio::fs::create_dir_all(output_dir).await?;
    let archive_path = output_dir.join(archive_name);

    let (src, dst) = (source_dir.to_path_buf(), archive_path.clone());
    let entries = tokio::task::spawn_blocking(move || write_archive(&src, &dst)).await??;

    debug!(source = %source_dir.display(), archive = %archive_path.display(), entries, "archive created");
    Ok(archive_path)
}

///
/// Unpacks the archive at `archive_path` into `target_dir`. Entry names are
/// taken as-is; no leading path segment is stripped
///
pub async fn extract_archive(archive_path: &Path, target_dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(target_dir).await?;
    let (src, dst) = (archive_path.to_path_buf(), target_dir.to_path_buf());
    tokio::task::spawn_blocking(move || unpack_archive(&src, &dst)).await??;

    debug!(archive = %archive_path.display(), target = %target_dir.display(), "archive extracted");
    Ok(())
}

///
/// Writes the archive to a hidden sibling of `archive_path` and moves it into
/// place only once complete, so a failed write leaves nothing behind
///
fn write_archive(source_dir: &Path, archive_path: &Path) -> Result<usize> {
    let output_dir = archive_path.parent().unwrap_or_else(|| Path::new("."));
    let staged = tempfile::Builder::new()
        .prefix(".archive-")
        .suffix(".partial")
        .tempfile_in(output_dir)?;
    let staged_path = staged.path().to_path_buf();

    let mut builder = Builder::new(GzEncoder::new(BufWriter::new(staged), Compression::default()));
    // Strip owners and timestamps so the archive restores identically on any host
    builder.mode(HeaderMode::Deterministic);
    builder.follow_symlinks(false);

    let mut entries = 0;
    let walker = WalkDir::new(source_dir)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.path() != archive_path && e.path() != staged_path);
    for entry in walker {
        let entry = entry?;
        let relative = entry.path().strip_prefix(source_dir)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        builder.append_path_with_name(entry.path(), relative)?;
        entries += 1;
    }

    let staged = builder.into_inner()?.finish()?
        .into_inner()
        .map_err(|e| e.into_error())?;
    staged.as_file().sync_all()?;
    staged.persist(archive_path).map_err(|e| e.error)?;
    Ok(entries)
}

fn unpack_archive(archive_path: &Path, target_dir: &Path) -> Result<()> {
    let file = BufReader::new(File::open(archive_path)?);
    let mut archive = Archive::new(GzDecoder::new(file));
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);
    archive.unpack(target_dir).map_err(|e| Error::InvalidArchive(e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use flate2::read::GzDecoder;
    use tempfile::tempdir;

    use super::{create_archive, error::Error, extract_archive};

    fn write(root: &Path, rel: &str, contents: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[tokio::test]
    async fn test_archive_round_trip_preserves_tree() {
        let source = tempdir().unwrap();
        write(source.path(), "server.properties", b"motd=hello");
        write(source.path(), "world/level.dat", &[0u8, 1, 2, 3, 255]);
        write(source.path(), "world/region/r.0.0.mca", &vec![7u8; 70_000]);
        std::fs::create_dir_all(source.path().join("logs")).unwrap();

        let out = tempdir().unwrap();
        let archive = create_archive(source.path(), out.path(), "snap.tar.gz").await.unwrap();
        assert_eq!(archive, out.path().join("snap.tar.gz"));

        let target = tempdir().unwrap();
        extract_archive(&archive, target.path()).await.unwrap();

        assert_eq!(std::fs::read(target.path().join("server.properties")).unwrap(), b"motd=hello");
        assert_eq!(std::fs::read(target.path().join("world/level.dat")).unwrap(), vec![0u8, 1, 2, 3, 255]);
        assert_eq!(std::fs::read(target.path().join("world/region/r.0.0.mca")).unwrap(), vec![7u8; 70_000]);
        assert!(target.path().join("logs").is_dir());
    }

    #[tokio::test]
    async fn test_archive_entries_are_relative_to_source() {
        let source = tempdir().unwrap();
        write(source.path(), "a/b.txt", b"b");

        let out = tempdir().unwrap();
        let archive = create_archive(source.path(), out.path(), "rel.tar.gz").await.unwrap();

        let file = std::fs::File::open(archive).unwrap();
        let mut tar = tar::Archive::new(GzDecoder::new(file));
        let mut names: Vec<String> = tar.entries().unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().trim_end_matches('/').to_string())
            .collect();
        names.sort();

        assert_eq!(names, vec!["a".to_string(), "a/b.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_archive_skips_itself_when_written_inside_source() {
        let source = tempdir().unwrap();
        write(source.path(), "data.txt", b"data");

        let archive = create_archive(source.path(), source.path(), "self.tar.gz").await.unwrap();
        let target = tempdir().unwrap();
        extract_archive(&archive, target.path()).await.unwrap();

        assert!(target.path().join("data.txt").exists());
        assert!(!target.path().join("self.tar.gz").exists());
    }

    #[tokio::test]
    async fn test_extract_rejects_garbage() {
        let dir = tempdir().unwrap();
        let bogus = dir.path().join("bogus.tar.gz");
        std::fs::write(&bogus, b"this is not gzip").unwrap();

        let result = extract_archive(&bogus, &dir.path().join("out")).await;
        assert!(matches!(result, Err(Error::InvalidArchive(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_write_leaves_no_partial_archive() {
        let source = tempdir().unwrap();
        write(source.path(), "server.properties", b"motd=hello");
        // tar cannot store sockets
        let _listener = std::os::unix::net::UnixListener::bind(source.path().join("rcon.sock")).unwrap();

        let out = tempdir().unwrap();
        let result = create_archive(source.path(), out.path(), "broken.tar.gz").await;

        assert!(matches!(result, Err(Error::IOError(_))));
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
    }
}
