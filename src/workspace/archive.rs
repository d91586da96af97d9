//! Gzipped tar import/export for workspaces.
//!
//! Export runs in portable mode: relative paths only, zeroed mtime/uid/gid,
//! fixed permission bits, entries in lexicographic path order.

use std::fs;
use std::io;
use std::path::{Component, Path};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder, EntryType, Header};
use tracing::debug;
use walkdir::WalkDir;

use super::sandbox::{to_posix, PathSandbox};
use crate::error::{Error, Result};

fn extract_err(err: impl std::fmt::Display) -> Error {
    Error::Extract(err.to_string())
}

/// Strip `strip` leading components from an archive member path.
///
/// Returns `None` when nothing remains (e.g. the stripped top-level directory).
/// `..` and root components are kept so the sandbox rejects them.
fn strip_components(path: &Path, strip: usize) -> Option<String> {
    let parts: Vec<String> = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .skip(strip)
        .map(|c| match c {
            Component::RootDir => "/".to_string(),
            other => other.as_os_str().to_string_lossy().into_owned(),
        })
        .collect();

    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/").replace("//", "/"))
}

/// Extract a gzipped tar stream into the sandbox root.
///
/// Only directories and regular files are materialised; links and device
/// entries are skipped. Returns the number of files written.
pub(crate) fn unpack(sandbox: &PathSandbox, buffer: &[u8], strip: usize) -> Result<usize> {
    let mut archive = Archive::new(GzDecoder::new(buffer));
    archive.set_preserve_permissions(false);

    let mut files = 0usize;
    for entry in archive.entries().map_err(extract_err)? {
        let mut entry = entry.map_err(extract_err)?;
        let member = entry.path().map_err(extract_err)?.into_owned();

        let Some(relative) = strip_components(&member, strip) else {
            continue;
        };

        let entry_type = entry.header().entry_type();
        match entry_type {
            EntryType::Directory => {
                let target = sandbox.resolve(&relative)?;
                fs::create_dir_all(&target).map_err(extract_err)?;
            }
            EntryType::Regular | EntryType::Continuous => {
                let target = sandbox.resolve(&relative)?;
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(extract_err)?;
                }
                entry.unpack(&target).map_err(extract_err)?;
                files += 1;
            }
            other => {
                debug!("Skipping archive member {} ({:?})", member.display(), other);
            }
        }
    }

    Ok(files)
}

/// Serialise everything under `root` into a portable gzipped tar.
pub(crate) fn pack(root: &Path) -> Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = Builder::new(encoder);

    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        let entry = entry.map_err(|e| Error::Walk(e.to_string()))?;
        let relative = match entry.path().strip_prefix(root) {
            Ok(p) => to_posix(p),
            Err(_) => continue,
        };

        let file_type = entry.file_type();
        let mut header = Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);

        if file_type.is_dir() {
            header.set_entry_type(EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
            builder.append_data(&mut header, format!("{relative}/"), io::empty())?;
        } else if file_type.is_file() {
            let data = fs::read(entry.path())?;
            header.set_entry_type(EntryType::Regular);
            header.set_mode(portable_mode(entry.path()));
            header.set_size(data.len() as u64);
            builder.append_data(&mut header, &relative, data.as_slice())?;
        } else {
            debug!("Skipping non-regular file during export: {}", relative);
        }
    }

    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

#[cfg(unix)]
fn portable_mode(path: &Path) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    match fs::metadata(path) {
        Ok(m) if m.permissions().mode() & 0o111 != 0 => 0o755,
        _ => 0o644,
    }
}

#[cfg(not(unix))]
fn portable_mode(_path: &Path) -> u32 {
    0o644
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_components() {
        assert_eq!(
            strip_components(Path::new("project/src/a.ts"), 1).as_deref(),
            Some("src/a.ts")
        );
        assert_eq!(
            strip_components(Path::new("./project/src/a.ts"), 1).as_deref(),
            Some("src/a.ts")
        );
        assert_eq!(strip_components(Path::new("project/"), 1), None);
        assert_eq!(
            strip_components(Path::new("src/a.ts"), 0).as_deref(),
            Some("src/a.ts")
        );
        assert_eq!(
            strip_components(Path::new("../evil.txt"), 0).as_deref(),
            Some("../evil.txt")
        );
    }

    #[test]
    fn test_pack_is_deterministic() {
        let tmp = tempfile::TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("src")).unwrap();
        fs::write(tmp.path().join("src/b.ts"), "b").unwrap();
        fs::write(tmp.path().join("a.txt"), "a").unwrap();

        let first = pack(tmp.path()).unwrap();
        let second = pack(tmp.path()).unwrap();
        assert_eq!(first, second);
    }
}
