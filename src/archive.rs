//! Zip archives of a data directory.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use derive_more::{Display, Error, From};
use walkdir::WalkDir;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::context::{self, Context};

#[derive(Debug, Display, Error, From)]
/// Errors on creating or extracting an archive.
pub enum ArchiveError {
    #[from]
    #[display("{_0}")]
    Io(io::Error),
    #[from]
    #[display("{_0}")]
    Zip(ZipError),
    #[from]
    #[display("{_0}")]
    Walk(walkdir::Error),
    /// An archive entry would be extracted outside of the destination.
    #[display("unsafe archive entry: {_0}")]
    UnsafeEntry(#[error(ignore)] String),
    /// The [Context] got cancelled.
    #[display("archiving cancelled")]
    Cancelled,
}

impl ArchiveError {
    fn from_io(e: io::Error) -> Self {
        if context::is_cancellation(&e) {
            Self::Cancelled
        } else {
            Self::Io(e)
        }
    }
}

/// Creates a zip archive at `dest` with the content of `source`.
///
/// Top level entries of `source` named in `exclude` are skipped together
/// with everything below them. Paths inside the archive are relative to
/// `source` and always use `/` as separator.
pub fn create(ctx: &Context, source: &Path, dest: &Path, exclude: &[&str]) -> Result<(), ArchiveError> {
    let mut zip = ZipWriter::new(BufWriter::new(File::create(dest)?));
    let file_options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);
    let dir_options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    let walker = WalkDir::new(source)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() != 1
                || !exclude
                    .iter()
                    .any(|excluded| entry.file_name() == *excluded)
        });

    let mut files = 0usize;
    for entry in walker {
        let entry = entry?;
        if ctx.is_cancelled() {
            return Err(ArchiveError::Cancelled);
        }

        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|_| ArchiveError::UnsafeEntry(entry.path().display().to_string()))?;
        let name = zip_name(relative)?;

        if entry.file_type().is_dir() {
            zip.add_directory(name, dir_options)?;
        } else if entry.file_type().is_file() {
            zip.start_file(name, file_options)?;
            let mut reader = BufReader::new(File::open(entry.path())?);
            ctx.copy(&mut reader, &mut zip).map_err(ArchiveError::from_io)?;
            files += 1;
        } else {
            log::debug!(target: "archive", "Skip special file {}", entry.path().display());
        }
    }

    zip.finish()?.into_inner().map_err(io::IntoInnerError::into_error)?.sync_all()?;
    log::debug!(target: "archive", "Archived {files} file(s) of {} into {}", source.display(), dest.display());

    Ok(())
}

/// Extracts the zip archive `archive` into `dest`.
///
/// Entries with absolute paths or `..` components are rejected.
pub fn extract(ctx: &Context, archive: &Path, dest: &Path) -> Result<(), ArchiveError> {
    let mut zip = ZipArchive::new(BufReader::new(File::open(archive)?))?;
    fs::create_dir_all(dest)?;

    for i in 0..zip.len() {
        if ctx.is_cancelled() {
            return Err(ArchiveError::Cancelled);
        }

        let mut file = zip.by_index(i)?;
        let relative: PathBuf = file
            .enclosed_name()
            .ok_or_else(|| ArchiveError::UnsafeEntry(file.name().to_string()))?;
        let outpath = dest.join(relative);

        if file.is_dir() {
            fs::create_dir_all(&outpath)?;
            continue;
        }

        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = BufWriter::new(File::create(&outpath)?);
        ctx.copy(&mut file, &mut out).map_err(ArchiveError::from_io)?;
        out.into_inner().map_err(io::IntoInnerError::into_error)?;
    }

    log::debug!(target: "archive", "Extracted {} entries into {}", zip.len(), dest.display());

    Ok(())
}

fn zip_name(relative: &Path) -> Result<String, ArchiveError> {
    let parts = relative
        .components()
        .map(|c| {
            c.as_os_str()
                .to_str()
                .ok_or_else(|| ArchiveError::UnsafeEntry(relative.display().to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    #[test]
    fn create_skips_excluded_and_extract_restores() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("pb_data");
        fs::create_dir_all(source.join("storage/col/rec")).unwrap();
        fs::create_dir_all(source.join("backups")).unwrap();
        fs::create_dir_all(source.join("nested/backups")).unwrap();
        fs::write(source.join("data.db"), b"sqlite").unwrap();
        fs::write(source.join("storage/col/rec/img.png"), vec![7u8; 4096]).unwrap();
        fs::write(source.join("backups/old.zip"), b"old").unwrap();
        fs::write(source.join("nested/backups/kept.txt"), b"kept").unwrap();

        let archive = tmp.path().join("out.zip");
        create(&Context::background(), &source, &archive, &["backups"]).unwrap();

        let dest = tmp.path().join("extracted");
        extract(&Context::background(), &archive, &dest).unwrap();

        assert_eq!(fs::read(dest.join("data.db")).unwrap(), b"sqlite");
        assert_eq!(
            fs::read(dest.join("storage/col/rec/img.png")).unwrap(),
            vec![7u8; 4096]
        );
        // only top level entries are excluded
        assert_eq!(fs::read(dest.join("nested/backups/kept.txt")).unwrap(), b"kept");
        assert!(!dest.join("backups").exists());
    }

    #[test]
    fn extract_rejects_garbage() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("garbage.zip");
        fs::write(&archive, b"definitely not a zip").unwrap();

        let res = extract(&Context::background(), &archive, &tmp.path().join("dest"));
        assert!(matches!(res, Err(ArchiveError::Zip(_))));
    }

    #[test]
    fn cancelled_create_fails() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("pb_data");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("data.db"), b"db").unwrap();
        let ctx = Context::background();
        ctx.cancel();

        let res = create(&ctx, &source, &tmp.path().join("cancelled.zip"), &[]);
        assert!(matches!(res, Err(ArchiveError::Cancelled)));
    }
}
