//! Opens a potentially-compressed tar archive, detects gzip/bzip2 by content when the extension
//! is absent, and yields the single regular file inside to a caller-supplied callback.

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use std::{
    fs::{self, File},
    io::{self, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};
use tar::{Archive, Entry};
use thiserror::Error;

/// The compression format detected for an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compression {
    /// No compression; the file is a plain tar stream.
    None,
    /// Gzip-compressed tar stream.
    Gzip,
    /// Bzip2-compressed tar stream.
    Bzip2,
}

impl Compression {
    /// The canonical extension to append when renaming a compressed archive in place.
    fn canonical_extension(self) -> Option<&'static str> {
        match self {
            Compression::None => None,
            Compression::Gzip => Some("tar.gz"),
            Compression::Bzip2 => Some("tar.bz2"),
        }
    }
}

/// Errors raised while reading an archive.
#[derive(Debug, Error)]
pub(crate) enum ArchiveError {
    /// The archive file could not be opened.
    #[error("failed to open archive {0}: {1}")]
    Open(PathBuf, io::Error),
    /// Neither plain tar, gzip, nor bzip2 framing could be detected.
    #[error("failed to detect archive compression for {0}")]
    DetectionFailed(PathBuf),
    /// The archive contains no entries.
    #[error("archive {0} is empty")]
    Empty(PathBuf),
    /// The first entry in the archive is not a regular file.
    #[error("first entry in archive {0} is not a regular file")]
    NotARegularFile(PathBuf),
    /// Renaming the archive in place failed.
    #[error("failed to rename archive {0}: {1}")]
    Rename(PathBuf, io::Error),
    /// An I/O error occurred while reading archive entries.
    #[error("I/O error reading archive {0}: {1}")]
    Io(PathBuf, io::Error),
}

/// Opens the archive at `path`, determines its compression, and invokes `f` with a reader
/// positioned at the payload of the archive's single regular file entry.
///
/// When `rename_if_compressed` is set and a compressed format was detected from content (i.e.
/// the filename didn't already carry the canonical extension), the file is renamed on disk by
/// appending the canonical extension before being reopened. This is an irreversible side effect
/// and callers should only opt into it when mutating the corpus in place is acceptable.
pub(crate) fn read_single_file<F, T>(
    path: &Path,
    rename_if_compressed: bool,
    mut f: F,
) -> Result<T, ArchiveError>
where
    F: FnMut(Entry<'_, Box<dyn Read>>) -> color_eyre::Result<T>,
{
    let (compression, detected_from_content) = detect_compression(path)?;

    let resolved_path = if rename_if_compressed && detected_from_content {
        rename_with_extension(path, compression)?
    } else {
        path.to_path_buf()
    };

    let file = File::open(&resolved_path)
        .map_err(|e| ArchiveError::Open(resolved_path.clone(), e))?;

    let reader: Box<dyn Read> = match compression {
        Compression::None => Box::new(file),
        Compression::Gzip => Box::new(GzDecoder::new(file)),
        Compression::Bzip2 => Box::new(BzDecoder::new(file)),
    };

    let mut archive = Archive::new(reader);
    let mut entries = archive
        .entries()
        .map_err(|e| ArchiveError::Io(resolved_path.clone(), e))?;

    let entry = entries
        .next()
        .ok_or_else(|| ArchiveError::Empty(resolved_path.clone()))?
        .map_err(|e| ArchiveError::Io(resolved_path.clone(), e))?;

    if !entry.header().entry_type().is_file() {
        return Err(ArchiveError::NotARegularFile(resolved_path.clone()));
    }

    f(entry).map_err(|e| ArchiveError::Io(resolved_path.clone(), io::Error::new(io::ErrorKind::Other, e)))
}

/// Determines the compression format of the archive at `path`.
///
/// Returns the detected [`Compression`] plus whether it was inferred from file content (as
/// opposed to the filename already carrying the canonical extension).
fn detect_compression(path: &Path) -> Result<(Compression, bool), ArchiveError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        return Ok((Compression::Gzip, false));
    }
    if name.ends_with(".tar.bz2") || name.ends_with(".tbz") {
        return Ok((Compression::Bzip2, false));
    }

    let mut file = File::open(path).map_err(|e| ArchiveError::Open(path.to_path_buf(), e))?;

    // 1. Try reading a plain tar header.
    if probe_tar_header(&mut file) {
        return Ok((Compression::None, false));
    }

    // 2. Rewind and attempt gzip.
    file.seek(SeekFrom::Start(0))
        .map_err(|e| ArchiveError::Io(path.to_path_buf(), e))?;
    if probe_gzip(&file) {
        return Ok((Compression::Gzip, true));
    }

    // 3. Rewind and attempt a bzip2-wrapped tar header.
    file.seek(SeekFrom::Start(0))
        .map_err(|e| ArchiveError::Io(path.to_path_buf(), e))?;
    if probe_bzip2(&file) {
        return Ok((Compression::Bzip2, true));
    }

    Err(ArchiveError::DetectionFailed(path.to_path_buf()))
}

/// Attempts to parse a plain tar header from the start of `reader`. Consumes the reader state,
/// so callers must treat it as exhausted / rewind before reuse.
fn probe_tar_header(file: &mut File) -> bool {
    let mut archive = Archive::new(&*file);
    let result = archive
        .entries()
        .map(|mut e| matches!(e.next(), Some(Ok(_))))
        .unwrap_or(false);
    let _ = file.seek(SeekFrom::Start(0));
    result
}

/// Attempts to decode a gzip stream and parse a tar header from it.
fn probe_gzip(file: &File) -> bool {
    let cloned = match file.try_clone() {
        Ok(f) => f,
        Err(_) => return false,
    };
    let decoder = GzDecoder::new(cloned);
    let mut archive = Archive::new(decoder);
    archive
        .entries()
        .map(|mut e| matches!(e.next(), Some(Ok(_))))
        .unwrap_or(false)
}

/// Attempts to decode a bzip2 stream and parse a tar header from it.
fn probe_bzip2(file: &File) -> bool {
    let cloned = match file.try_clone() {
        Ok(f) => f,
        Err(_) => return false,
    };
    let decoder = BzDecoder::new(cloned);
    let mut archive = Archive::new(decoder);
    archive
        .entries()
        .map(|mut e| matches!(e.next(), Some(Ok(_))))
        .unwrap_or(false)
}

/// Renames `path` in place by appending the canonical extension for `compression`, returning
/// the new path.
fn rename_with_extension(path: &Path, compression: Compression) -> Result<PathBuf, ArchiveError> {
    let Some(ext) = compression.canonical_extension() else {
        return Ok(path.to_path_buf());
    };

    let new_path = path.with_extension(ext);
    fs::rename(path, &new_path).map_err(|e| ArchiveError::Rename(path.to_path_buf(), e))?;
    Ok(new_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn build_tar(contents: &[u8]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_cksum();
        builder
            .append_data(&mut header, "payload.json", contents)
            .unwrap();
        builder.into_inner().unwrap()
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        use flate2::{write::GzEncoder, Compression as GzCompression};
        let mut encoder = GzEncoder::new(Vec::new(), GzCompression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn bzip2(data: &[u8]) -> Vec<u8> {
        use bzip2::{write::BzEncoder, Compression as BzCompression};
        let mut encoder = BzEncoder::new(Vec::new(), BzCompression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn read_payload(path: &Path, rename: bool) -> Vec<u8> {
        let mut out = Vec::new();
        read_single_file(path, rename, |mut entry| {
            entry.read_to_end(&mut out)?;
            Ok(())
        })
        .unwrap();
        out
    }

    #[test]
    fn reads_plain_tar_without_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test_01.tar");
        fs::write(&path, build_tar(b"hello")).unwrap();

        assert_eq!(read_payload(&path, false), b"hello");
    }

    #[test]
    fn detects_gzip_from_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test_01.tar.gz");
        fs::write(&path, gzip(&build_tar(b"gz-payload"))).unwrap();

        assert_eq!(read_payload(&path, false), b"gz-payload");
    }

    #[test]
    fn detects_gzip_from_content_without_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test_01.tgzish");
        fs::write(&path, gzip(&build_tar(b"sniffed-gz"))).unwrap();

        assert_eq!(read_payload(&path, false), b"sniffed-gz");
    }

    #[test]
    fn detects_bzip2_from_content_without_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test_01.weird");
        fs::write(&path, bzip2(&build_tar(b"sniffed-bz"))).unwrap();

        assert_eq!(read_payload(&path, false), b"sniffed-bz");
    }

    #[test]
    fn renames_compressed_archive_when_flag_set() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test_01.weird");
        fs::write(&path, gzip(&build_tar(b"rename-me"))).unwrap();

        assert_eq!(read_payload(&path, true), b"rename-me");
        assert!(!path.exists());
        assert!(dir.path().join("test_01.tar.gz").exists());
    }

    #[test]
    fn does_not_rename_when_flag_unset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test_01.weird");
        fs::write(&path, gzip(&build_tar(b"stay-put"))).unwrap();

        assert_eq!(read_payload(&path, false), b"stay-put");
        assert!(path.exists());
    }

    #[test]
    fn empty_archive_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test_01.tar");
        let builder = tar::Builder::new(Vec::new());
        fs::write(&path, builder.into_inner().unwrap()).unwrap();

        let err = read_single_file(&path, false, |_| Ok(())).unwrap_err();
        assert!(matches!(err, ArchiveError::Empty(_)));
    }

    #[test]
    fn undetectable_archive_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test_01.bin");
        fs::write(&path, b"not an archive at all, just plain bytes").unwrap();

        let err = detect_compression(&path).unwrap_err();
        assert!(matches!(err, ArchiveError::DetectionFailed(_)));
    }
}
