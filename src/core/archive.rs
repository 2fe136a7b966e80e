use std::fs;
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use crate::core::cancellation::CancellationToken;
use crate::core::error::ArchiveError;
use crate::core::progress::Progress;

pub type ArchiveReader<'a> = ZipArchive<Cursor<&'a [u8]>>;

/// Opens downloaded bytes as a zip container. This is the integrity gate:
/// anything that fails here is never unpacked.
pub fn open_archive(bytes: &[u8]) -> Result<ArchiveReader<'_>, ArchiveError> {
    ZipArchive::new(Cursor::new(bytes)).map_err(ArchiveError::Unreadable)
}

/// Writes every entry with a nonzero size under `destination`, creating
/// parent directories. Progress is the cumulative uncompressed byte count
/// over the total payload, reported after each entry. Returns the number of
/// bytes written.
pub fn install_archive(
    bytes: &[u8],
    destination: &Path,
    cancel: &CancellationToken,
    on_progress: &mut dyn FnMut(Progress),
) -> Result<u64, ArchiveError> {
    let mut archive = open_archive(bytes)?;

    let mut total = 0u64;
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .map_err(|source| ArchiveError::Entry { index, source })?;
        if !entry.is_dir() {
            total += entry.size();
        }
    }

    let mut written = 0u64;
    for index in 0..archive.len() {
        if cancel.is_cancelled() {
            return Err(ArchiveError::Cancelled);
        }
        let mut entry = archive
            .by_index(index)
            .map_err(|source| ArchiveError::Entry { index, source })?;
        if entry.is_dir() || entry.size() == 0 {
            continue;
        }

        let target = destination.join(entry_relative_path(entry.enclosed_name(), entry.name())?);
        let mode = entry.unix_mode();
        written += write_entry(&mut entry, mode, &target)?;
        on_progress(Progress::new(written, total));
    }

    Ok(written)
}

/// Unpacks the whole archive into `destination`. Each file counts as two
/// progress units, one when its write starts and one when it completes, so
/// the reported total is twice the file count.
pub fn extract_to_staging(
    bytes: &[u8],
    destination: &Path,
    cancel: &CancellationToken,
    on_progress: &mut dyn FnMut(Progress),
) -> Result<usize, ArchiveError> {
    let mut archive = open_archive(bytes)?;

    let mut files = Vec::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .map_err(|source| ArchiveError::Entry { index, source })?;
        let target = destination.join(entry_relative_path(entry.enclosed_name(), entry.name())?);
        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|source| ArchiveError::Write {
                path: target.clone(),
                source,
            })?;
        } else {
            files.push((index, target));
        }
    }

    let units = files.len() as u64 * 2;
    for (position, (index, target)) in files.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(ArchiveError::Cancelled);
        }
        let done = position as u64 * 2;
        on_progress(Progress::new(done + 1, units));
        let mut entry = archive
            .by_index(*index)
            .map_err(|source| ArchiveError::Entry {
                index: *index,
                source,
            })?;
        let mode = entry.unix_mode();
        write_entry(&mut entry, mode, target)?;
        on_progress(Progress::new(done + 2, units));
    }

    Ok(files.len())
}

fn entry_relative_path(enclosed: Option<PathBuf>, name: &str) -> Result<PathBuf, ArchiveError> {
    enclosed
        .filter(|path| !path.as_os_str().is_empty())
        .ok_or_else(|| ArchiveError::UnsafePath(name.to_string()))
}

fn write_entry(
    entry: &mut impl Read,
    unix_mode: Option<u32>,
    target: &Path,
) -> Result<u64, ArchiveError> {
    let write_error = |source: io::Error| ArchiveError::Write {
        path: target.to_path_buf(),
        source,
    };

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|source| ArchiveError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let mut contents = Vec::new();
    entry.read_to_end(&mut contents).map_err(write_error)?;
    let mut out = fs::File::create(target).map_err(write_error)?;
    out.write_all(&contents).map_err(write_error)?;

    #[cfg(unix)]
    if let Some(mode) = unix_mode {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(target, fs::Permissions::from_mode(mode & 0o7777))
            .map_err(write_error)?;
    }

    Ok(contents.len() as u64)
}
