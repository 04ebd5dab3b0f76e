//! Archive and directory operations for deploy, backup and rollback
//!
//! Everything here is blocking filesystem work; async callers go through
//! `tokio::task::spawn_blocking`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::errors::DeployError;

/// Forward-slash relative path, as stored in archives and manifests
pub fn relative_name(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Archive every regular file under `source_dir` into `dest_dir`.
///
/// Entries are rooted at the source directory's base name. Returns `None`
/// when the source does not exist yet, as on a first deployment.
pub fn create_archive(
    source_dir: &Path,
    dest_dir: &Path,
    stem: &str,
) -> Result<Option<PathBuf>, DeployError> {
    if !source_dir.is_dir() {
        debug!("Nothing to archive, {:?} does not exist", source_dir);
        return Ok(None);
    }

    let base = source_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".to_string());

    fs::create_dir_all(dest_dir)?;
    let archive_path = dest_dir.join(format!(
        "{}-{}.zip",
        stem,
        Utc::now().format("%Y%m%d-%H%M%S")
    ));
    let partial = archive_path.with_extension("zip.partial");

    let result = write_archive(source_dir, &base, &partial);
    if let Err(e) = result {
        let _ = fs::remove_file(&partial);
        return Err(e);
    }
    fs::rename(&partial, &archive_path)?;

    info!("Archived {:?} to {:?}", source_dir, archive_path);
    Ok(Some(archive_path))
}

fn write_archive(source_dir: &Path, base: &str, out: &Path) -> Result<(), DeployError> {
    let mut writer = ZipWriter::new(fs::File::create(out)?);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(source_dir).sort_by_file_name() {
        let entry = entry?;
        let Some(rel) = relative_name(source_dir, entry.path()) else {
            continue;
        };
        let name = format!("{}/{}", base, rel);

        if entry.file_type().is_dir() {
            writer.add_directory(name, options)?;
        } else if entry.file_type().is_file() {
            writer.start_file(name, options)?;
            let mut file = fs::File::open(entry.path())?;
            io::copy(&mut file, &mut writer)?;
        }
    }

    writer.finish()?;
    Ok(())
}

/// Unpack an archive into `into`, returning the number of files written.
///
/// Entry paths are kept as stored, except that a leading `root` directory
/// (the one `create_archive` writes) is removed when given.
fn unpack(archive_path: &Path, into: &Path, root: Option<&str>) -> Result<usize, DeployError> {
    let mut archive = ZipArchive::new(fs::File::open(archive_path)?)?;
    fs::create_dir_all(into)?;

    let mut files = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(name) = entry.enclosed_name().map(Path::to_path_buf) else {
            warn!("Skipping unsafe archive entry {}", entry.name());
            continue;
        };
        let rel = match root.map(|root| name.strip_prefix(root)) {
            Some(Ok(rel)) => rel.to_path_buf(),
            _ => name,
        };
        if rel.as_os_str().is_empty() {
            continue;
        }

        let out = into.join(&rel);
        if entry.is_dir() {
            fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(&out)?;
        io::copy(&mut entry, &mut file)?;
        files += 1;
    }

    Ok(files)
}

/// Recursively copy `src` over `dest`, creating `dest` if needed
pub fn copy_tree(src: &Path, dest: &Path) -> Result<usize, DeployError> {
    fs::create_dir_all(dest)?;
    let mut files = 0;
    for entry in WalkDir::new(src) {
        let entry = entry?;
        let Ok(rel) = entry.path().strip_prefix(src) else {
            continue;
        };
        if rel.as_os_str().is_empty() {
            continue;
        }
        let out = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&out)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = out.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &out)?;
            files += 1;
        }
    }
    Ok(files)
}

fn scratch_dir(prefix: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{}-{}", prefix, uuid::Uuid::new_v4()))
}

/// Inflate an archive into a scratch directory, then overlay it onto
/// `dest_dir`. Files absent from the archive are left in place.
pub fn extract_archive(archive_path: &Path, dest_dir: &Path) -> Result<usize, DeployError> {
    let scratch = scratch_dir("deployd-extract");
    let result = unpack(archive_path, &scratch, None).and_then(|_| copy_tree(&scratch, dest_dir));
    if let Err(e) = fs::remove_dir_all(&scratch) {
        warn!("Failed to remove scratch directory {:?}: {}", scratch, e);
    }

    let files = result?;
    info!("Extracted {} files from {:?} into {:?}", files, archive_path, dest_dir);
    Ok(files)
}

/// Replace `target_dir` with the archive contents, paths as stored.
///
/// The archive is unpacked next to the target and swapped in with renames, so
/// the live directory is never observed half-written.
pub fn install_archive(archive_path: &Path, target_dir: &Path) -> Result<usize, DeployError> {
    swap_in(archive_path, target_dir, None)
}

/// Replace `target_dir` with a backup taken of it by `create_archive`
pub fn restore_backup(backup_path: &Path, target_dir: &Path) -> Result<usize, DeployError> {
    let root = target_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".to_string());
    swap_in(backup_path, target_dir, Some(&root))
}

fn swap_in(archive_path: &Path, target_dir: &Path, root: Option<&str>) -> Result<usize, DeployError> {
    let parent = target_dir
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let name = target_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            DeployError::ConfigError(format!("invalid target directory {:?}", target_dir))
        })?;
    fs::create_dir_all(&parent)?;

    let id = uuid::Uuid::new_v4();
    let staging = parent.join(format!(".{}.staging-{}", name, id));
    let retired = parent.join(format!(".{}.old-{}", name, id));

    let files = match unpack(archive_path, &staging, root) {
        Ok(files) => files,
        Err(e) => {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }
    };

    let had_target = target_dir.exists();
    if had_target {
        if let Err(e) = fs::rename(target_dir, &retired) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e.into());
        }
    }
    if let Err(e) = fs::rename(&staging, target_dir) {
        if had_target {
            let _ = fs::rename(&retired, target_dir);
        }
        let _ = fs::remove_dir_all(&staging);
        return Err(e.into());
    }
    if had_target {
        if let Err(e) = fs::remove_dir_all(&retired) {
            warn!("Failed to remove retired tree {:?}: {}", retired, e);
        }
    }

    info!("Installed {} files from {:?} into {:?}", files, archive_path, target_dir);
    Ok(files)
}

/// Read one file out of an archive by its stored path
pub fn read_archive_entry(archive_path: &Path, rel_path: &str) -> Result<Option<Vec<u8>>, DeployError> {
    let mut archive = ZipArchive::new(fs::File::open(archive_path)?)?;
    let mut entry = match archive.by_name(rel_path) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut contents = Vec::new();
    io::copy(&mut entry, &mut contents)?;
    Ok(Some(contents))
}

/// Keep the newest `keep` archives in `dir` (0 keeps all); returns removed paths
pub fn prune_backups(dir: &Path, keep: usize) -> Result<Vec<PathBuf>, DeployError> {
    if keep == 0 || !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut archives = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("zip") {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        archives.push((modified, path));
    }
    archives.sort_by(|a, b| b.cmp(a));

    let mut removed = Vec::new();
    for (_, path) in archives.into_iter().skip(keep) {
        fs::remove_file(&path)?;
        debug!("Pruned backup {:?}", path);
        removed.push(path);
    }
    Ok(removed)
}
