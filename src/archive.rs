//! Versioned snapshot extraction
//!
//! The legacy application tree ships as a gzip-compressed tar snapshot. At boot
//! the snapshot is materialized into a writable root exactly once; a marker file
//! holding the snapshot's SHA-256 digest records which snapshot produced the
//! tree so later boots can skip the work or notice foreign contents.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Marker file written at the root of an extracted tree
pub const MARKER_FILE: &str = ".atomgate-version";

/// Directories left out of snapshots when packing
pub const DEFAULT_EXCLUDES: &[&str] = &[".git", "cache", "log", "uploads", "web/uploads"];

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("application root path is empty")]
    EmptyTarget,

    #[error("application root {0} exists and is not a directory")]
    NotADirectory(PathBuf),

    #[error("application root {0} exists and differs from the snapshot")]
    RootExistsAndDiffers(PathBuf),

    #[error("snapshot contains invalid entry path {0:?}")]
    InvalidEntryPath(String),

    #[error("snapshot is empty")]
    EmptySnapshot,

    #[error("failed to read snapshot {path}: {source}")]
    ReadSnapshot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("pack source {0} is not a directory")]
    SourceNotADirectory(PathBuf),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Walk(#[from] walkdir::Error),
}

/// An immutable compressed snapshot of the legacy tree
#[derive(Debug, Clone)]
pub struct Snapshot {
    bytes: Vec<u8>,
    digest: String,
}

impl Snapshot {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let digest = hex::encode(Sha256::digest(&bytes));
        Self { bytes, digest }
    }

    /// Read a snapshot from disk
    pub fn load(path: &Path) -> Result<Self, ArchiveError> {
        let bytes = fs::read(path).map_err(|source| ArchiveError::ReadSnapshot {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_bytes(bytes))
    }

    /// Lower-case hex SHA-256 of the raw snapshot bytes
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Make sure `target` holds this snapshot's tree.
    ///
    /// Returns `true` when an extraction happened. Not safe to call
    /// concurrently on the same target.
    pub fn ensure_extracted(&self, target: &Path, force: bool) -> Result<bool, ArchiveError> {
        if target.as_os_str().is_empty() {
            return Err(ArchiveError::EmptyTarget);
        }

        match fs::metadata(target) {
            Ok(meta) => {
                if !meta.is_dir() {
                    return Err(ArchiveError::NotADirectory(target.to_path_buf()));
                }

                if self.marker_matches(target) {
                    debug!(target = %target.display(), digest = %self.digest, "Snapshot already extracted");
                    return Ok(false);
                }

                if force {
                    info!(target = %target.display(), "Removing stale application root before extraction");
                    fs::remove_dir_all(target)?;
                } else if !dir_is_empty(target)? {
                    return Err(ArchiveError::RootExistsAndDiffers(target.to_path_buf()));
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        self.extract_into(target)?;

        // Only after every entry is on disk
        fs::write(target.join(MARKER_FILE), &self.digest)?;
        info!(target = %target.display(), digest = %self.digest, "Snapshot extracted");

        Ok(true)
    }

    fn marker_matches(&self, target: &Path) -> bool {
        read_marker(target)
            .map(|marker| marker == self.digest)
            .unwrap_or(false)
    }

    /// Unpack every entry of the snapshot below `target`.
    pub fn extract_into(&self, target: &Path) -> Result<(), ArchiveError> {
        if self.is_empty() {
            return Err(ArchiveError::EmptySnapshot);
        }

        fs::create_dir_all(target)?;
        let root = fs::canonicalize(target)?;

        let mut archive = tar::Archive::new(GzDecoder::new(&self.bytes[..]));
        for entry in archive.entries()? {
            let mut entry = entry?;
            let raw_path = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            if raw_path.is_empty() {
                continue;
            }

            let rel = clean_entry_path(&raw_path)?;
            if rel.as_os_str().is_empty() {
                continue;
            }
            let dst = root.join(&rel);
            let mode = entry.header().mode().unwrap_or(0o644) & 0o7777;
            let entry_type = entry.header().entry_type();

            if entry_type.is_dir() {
                ensure_contained(&root, &dst, &raw_path)?;
                create_dir_with_mode(&dst, mode)?;
            } else if entry_type.is_symlink() {
                let Some(link) = entry.link_name()? else {
                    continue;
                };
                ensure_contained(&root, dst.parent().unwrap_or(root.as_path()), &raw_path)?;
                ensure_parent(&dst)?;
                create_symlink(&link, &dst)?;
            } else if entry_type.is_file() {
                ensure_contained(&root, dst.parent().unwrap_or(root.as_path()), &raw_path)?;
                ensure_parent(&dst)?;
                // Replace a link left by an earlier entry rather than write through it
                if fs::symlink_metadata(&dst).is_ok_and(|meta| meta.file_type().is_symlink()) {
                    fs::remove_file(&dst)?;
                }
                let mut out = open_truncate_with_mode(&dst, mode)?;
                io::copy(&mut entry, &mut out)?;
                out.flush()?;
            } else {
                debug!(path = %raw_path, "Skipping unsupported snapshot entry type");
            }
        }

        Ok(())
    }
}

/// Read the digest recorded in a tree's marker file
pub fn read_marker(target: &Path) -> Option<String> {
    fs::read_to_string(target.join(MARKER_FILE))
        .ok()
        .map(|contents| contents.trim().to_string())
}

/// Lexically clean a stored entry path, rejecting absolute and escaping paths.
pub fn clean_entry_path(raw: &str) -> Result<PathBuf, ArchiveError> {
    let invalid = || ArchiveError::InvalidEntryPath(raw.to_string());
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();

    for component in Path::new(raw).components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(invalid());
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(invalid()),
        }
    }

    Ok(parts.iter().collect())
}

/// The deepest existing ancestor of `path` (itself included) must resolve
/// inside `root`, so links extracted earlier cannot redirect later writes.
fn ensure_contained(root: &Path, path: &Path, raw: &str) -> Result<(), ArchiveError> {
    let escaped = || ArchiveError::InvalidEntryPath(raw.to_string());
    let existing = path
        .ancestors()
        .find(|ancestor| fs::symlink_metadata(ancestor).is_ok())
        .ok_or_else(escaped)?;
    let resolved = fs::canonicalize(existing).map_err(|_| escaped())?;
    if resolved.starts_with(root) {
        Ok(())
    } else {
        Err(escaped())
    }
}

fn dir_is_empty(dir: &Path) -> io::Result<bool> {
    Ok(fs::read_dir(dir)?.next().is_none())
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) => create_dir_with_mode(parent, 0o755),
        None => Ok(()),
    }
}

#[cfg(unix)]
fn create_dir_with_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(mode).create(path)
}

#[cfg(not(unix))]
fn create_dir_with_mode(path: &Path, _mode: u32) -> io::Result<()> {
    fs::create_dir_all(path)
}

#[cfg(unix)]
fn open_truncate_with_mode(path: &Path, mode: u32) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)
}

#[cfg(not(unix))]
fn open_truncate_with_mode(path: &Path, _mode: u32) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

#[cfg(unix)]
fn create_symlink(link: &Path, dst: &Path) -> io::Result<()> {
    match std::os::unix::fs::symlink(link, dst) {
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        other => other,
    }
}

#[cfg(not(unix))]
fn create_symlink(link: &Path, dst: &Path) -> io::Result<()> {
    debug!(link = %link.display(), dst = %dst.display(), "Symlinks unsupported, skipping");
    Ok(())
}

/// Whether a slash-separated relative path falls under an excluded directory
pub fn is_excluded(rel: &str, excludes: &[&str]) -> bool {
    let rel = rel.trim_end_matches('/');
    excludes.iter().any(|exclude| {
        let exclude = exclude.trim_end_matches('/');
        rel == exclude
            || rel
                .strip_prefix(exclude)
                .map(|rest| rest.starts_with('/'))
                .unwrap_or(false)
    })
}

/// Pack `src` into a reproducible gzip tar written to `writer`.
///
/// Entries are sorted, carry mtime 0 and uid/gid 0, keep their permission
/// bits, and symlinks are stored as links.
pub fn pack_dir<W: Write>(src: &Path, writer: W, excludes: &[&str]) -> Result<W, ArchiveError> {
    if !src.is_dir() {
        return Err(ArchiveError::SourceNotADirectory(src.to_path_buf()));
    }

    let mut builder = tar::Builder::new(GzEncoder::new(writer, Compression::default()));
    builder.follow_symlinks(false);

    let walker = WalkDir::new(src)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| match entry.path().strip_prefix(src) {
            Ok(rel) => !is_excluded(&slash_path(rel), excludes),
            Err(_) => true,
        });

    for entry in walker {
        let entry = entry?;
        let rel = match entry.path().strip_prefix(src) {
            Ok(rel) if !rel.as_os_str().is_empty() => slash_path(rel),
            _ => continue,
        };

        let meta = fs::symlink_metadata(entry.path())?;
        let file_type = meta.file_type();
        let mut header = tar::Header::new_gnu();
        header.set_metadata_in_mode(&meta, tar::HeaderMode::Deterministic);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            header.set_mode(meta.permissions().mode() & 0o7777);
        }
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);

        if file_type.is_dir() {
            header.set_size(0);
            builder.append_data(&mut header, &rel, io::empty())?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(entry.path())?;
            header.set_size(0);
            builder.append_link(&mut header, &rel, target)?;
        } else if file_type.is_file() {
            let file = File::open(entry.path())?;
            builder.append_data(&mut header, &rel, file)?;
        } else {
            debug!(path = %rel, "Skipping special file while packing");
        }
    }

    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

fn slash_path(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Read a snapshot's entries as `(path, contents)` pairs for regular files.
pub fn list_files(snapshot: &Snapshot) -> Result<Vec<(String, Vec<u8>)>, ArchiveError> {
    let mut archive = tar::Archive::new(GzDecoder::new(&snapshot.bytes[..]));
    let mut files = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents)?;
        files.push((path, contents));
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn source_tree(files: &[(&str, &str)]) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (path, contents) in files {
            let full = dir.path().join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(full, contents).unwrap();
        }
        dir
    }

    fn snapshot_of(files: &[(&str, &str)]) -> Snapshot {
        let src = source_tree(files);
        let bytes = pack_dir(src.path(), Vec::new(), DEFAULT_EXCLUDES).unwrap();
        Snapshot::from_bytes(bytes)
    }

    /// A gzip tar whose single entry carries an arbitrary raw name
    fn crafted_snapshot(entries: &[(&str, &[u8])]) -> Snapshot {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (name, data) in entries {
            let mut header = tar::Header::new_old();
            let raw = name.as_bytes();
            header.as_old_mut().name[..raw.len()].copy_from_slice(raw);
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append(&header, *data).unwrap();
        }
        let bytes = builder.into_inner().unwrap().finish().unwrap();
        Snapshot::from_bytes(bytes)
    }

    #[test]
    fn test_digest_is_sha256_hex() {
        let snapshot = Snapshot::from_bytes(b"abc".to_vec());
        assert_eq!(
            snapshot.digest(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_extract_into_missing_target() {
        let snapshot = snapshot_of(&[("index.php", "<?php"), ("css/main.css", "body{}")]);
        let parent = tempfile::tempdir().unwrap();
        let target = parent.path().join("atom");

        assert!(snapshot.ensure_extracted(&target, false).unwrap());
        assert_eq!(fs::read_to_string(target.join("css/main.css")).unwrap(), "body{}");
        assert_eq!(read_marker(&target).as_deref(), Some(snapshot.digest()));
    }

    #[test]
    fn test_second_call_is_noop() {
        let snapshot = snapshot_of(&[("index.php", "<?php")]);
        let parent = tempfile::tempdir().unwrap();
        let target = parent.path().join("atom");

        assert!(snapshot.ensure_extracted(&target, false).unwrap());
        assert!(!snapshot.ensure_extracted(&target, false).unwrap());
        assert!(!snapshot.ensure_extracted(&target, true).unwrap());
    }

    #[test]
    fn test_extract_into_empty_directory() {
        let snapshot = snapshot_of(&[("index.php", "<?php")]);
        let target = tempfile::tempdir().unwrap();

        assert!(snapshot.ensure_extracted(target.path(), false).unwrap());
        assert!(target.path().join("index.php").is_file());
    }

    #[test]
    fn test_target_is_a_file() {
        let snapshot = snapshot_of(&[("index.php", "<?php")]);
        let parent = tempfile::tempdir().unwrap();
        let target = parent.path().join("atom");
        fs::write(&target, b"not a dir").unwrap();

        let err = snapshot.ensure_extracted(&target, true).unwrap_err();
        assert!(matches!(err, ArchiveError::NotADirectory(_)));
    }

    #[test]
    fn test_empty_target_path() {
        let snapshot = snapshot_of(&[("index.php", "<?php")]);
        let err = snapshot.ensure_extracted(Path::new(""), false).unwrap_err();
        assert!(matches!(err, ArchiveError::EmptyTarget));
    }

    #[test]
    fn test_conflict_then_force() {
        let a = snapshot_of(&[("index.php", "a"), ("only-in-a.txt", "a")]);
        let b = snapshot_of(&[("index.php", "b")]);
        assert_ne!(a.digest(), b.digest());

        let target = tempfile::tempdir().unwrap();
        assert!(a.ensure_extracted(target.path(), false).unwrap());

        let err = b.ensure_extracted(target.path(), false).unwrap_err();
        assert!(matches!(err, ArchiveError::RootExistsAndDiffers(_)));
        assert_eq!(read_marker(target.path()).as_deref(), Some(a.digest()));

        assert!(b.ensure_extracted(target.path(), true).unwrap());
        assert_eq!(read_marker(target.path()).as_deref(), Some(b.digest()));
        assert_eq!(fs::read_to_string(target.path().join("index.php")).unwrap(), "b");
        assert!(!target.path().join("only-in-a.txt").exists());
    }

    #[test]
    fn test_foreign_contents_without_marker() {
        let snapshot = snapshot_of(&[("index.php", "<?php")]);
        let target = tempfile::tempdir().unwrap();
        fs::write(target.path().join("README"), b"hand-made").unwrap();

        let err = snapshot.ensure_extracted(target.path(), false).unwrap_err();
        assert!(matches!(err, ArchiveError::RootExistsAndDiffers(_)));
        assert!(target.path().join("README").exists());
    }

    #[test]
    fn test_traversal_entry_rejected() {
        let parent = tempfile::tempdir().unwrap();
        let target = parent.path().join("a/b");
        let snapshot = crafted_snapshot(&[("ok.txt", b"ok"), ("../../etc/passwd", b"root:x")]);

        let err = snapshot.ensure_extracted(&target, false).unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidEntryPath(_)));
        assert!(!parent.path().join("etc/passwd").exists());
        assert!(read_marker(&target).is_none());
    }

    /// A gzip tar with a symlink entry followed by regular files
    #[cfg(unix)]
    fn linked_snapshot(link: &str, target: &Path, files: &[(&str, &[u8])]) -> Snapshot {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        header.set_mode(0o777);
        builder.append_link(&mut header, link, target).unwrap();
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        let bytes = builder.into_inner().unwrap().finish().unwrap();
        Snapshot::from_bytes(bytes)
    }

    #[cfg(unix)]
    #[test]
    fn test_write_through_escaping_symlink_rejected() {
        let outside = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        let snapshot = linked_snapshot("web", outside.path(), &[("web/pwned.txt", b"owned")]);

        let err = snapshot.ensure_extracted(target.path(), false).unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidEntryPath(_)));
        assert!(!outside.path().join("pwned.txt").exists());
        assert!(read_marker(target.path()).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_escaping_symlink_in_parent_chain_rejected() {
        let outside = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        let snapshot = linked_snapshot("web", outside.path(), &[("web/css/x.css", b"x")]);

        let err = snapshot.extract_into(target.path()).unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidEntryPath(_)));
        assert!(!outside.path().join("css").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_entry_replaces_symlink_instead_of_following_it() {
        let outside = tempfile::tempdir().unwrap();
        let secret = outside.path().join("secret.txt");
        fs::write(&secret, b"untouched").unwrap();

        let target = tempfile::tempdir().unwrap();
        let snapshot = linked_snapshot("config.php", &secret, &[("config.php", b"<?php")]);
        snapshot.extract_into(target.path()).unwrap();

        assert_eq!(fs::read_to_string(&secret).unwrap(), "untouched");
        let written = target.path().join("config.php");
        assert!(!fs::symlink_metadata(&written).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_to_string(written).unwrap(), "<?php");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_inside_root_still_usable() {
        let target = tempfile::tempdir().unwrap();
        let snapshot = linked_snapshot(
            "web",
            Path::new("public"),
            &[("public/index.html", b"hi"), ("web/extra.txt", b"extra")],
        );
        snapshot.extract_into(target.path()).unwrap();
        assert_eq!(
            fs::read_to_string(target.path().join("public/extra.txt")).unwrap(),
            "extra"
        );
    }

    #[test]
    fn test_clean_entry_path() {
        assert_eq!(clean_entry_path("a/./b").unwrap(), PathBuf::from("a/b"));
        assert_eq!(clean_entry_path("a/../b").unwrap(), PathBuf::from("b"));
        assert_eq!(clean_entry_path("./").unwrap(), PathBuf::new());
        assert!(clean_entry_path("../x").is_err());
        assert!(clean_entry_path("a/../../x").is_err());
        assert!(clean_entry_path("/etc/passwd").is_err());
    }

    #[test]
    fn test_interrupted_extraction_is_not_trusted() {
        let good = snapshot_of(&[("index.php", "<?php")]);
        let broken = crafted_snapshot(&[("index.php", b"partial"), ("../escape", b"x")]);

        let target = tempfile::tempdir().unwrap();
        assert!(broken.ensure_extracted(target.path(), false).is_err());
        assert!(target.path().join("index.php").exists());
        assert!(read_marker(target.path()).is_none());

        let err = good.ensure_extracted(target.path(), false).unwrap_err();
        assert!(matches!(err, ArchiveError::RootExistsAndDiffers(_)));
        assert!(good.ensure_extracted(target.path(), true).unwrap());
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = Snapshot::from_bytes(Vec::new());
        let parent = tempfile::tempdir().unwrap();
        let err = snapshot
            .ensure_extracted(&parent.path().join("atom"), false)
            .unwrap_err();
        assert!(matches!(err, ArchiveError::EmptySnapshot));
    }

    #[test]
    fn test_pack_skips_excluded_directories() {
        let snapshot = snapshot_of(&[
            ("index.php", "<?php"),
            ("cache/qubit/x", "cached"),
            ("log/qubit.log", "log"),
            ("web/uploads/r/a.jpg", "img"),
            ("web/index.html", "html"),
            (".git/HEAD", "ref"),
            ("lib/cache.php", "<?php"),
        ]);

        let mut paths: Vec<String> = list_files(&snapshot)
            .unwrap()
            .into_iter()
            .map(|(path, _)| path)
            .collect();
        paths.sort();
        assert_eq!(paths, vec!["index.php", "lib/cache.php", "web/index.html"]);
    }

    #[test]
    fn test_pack_is_reproducible() {
        let src = source_tree(&[("index.php", "<?php"), ("css/main.css", "body{}")]);
        let first = pack_dir(src.path(), Vec::new(), DEFAULT_EXCLUDES).unwrap();
        let second = pack_dir(src.path(), Vec::new(), DEFAULT_EXCLUDES).unwrap();
        assert_eq!(
            Snapshot::from_bytes(first).digest(),
            Snapshot::from_bytes(second).digest()
        );
    }

    #[test]
    fn test_is_excluded() {
        assert!(is_excluded("cache", DEFAULT_EXCLUDES));
        assert!(is_excluded("cache/a/b", DEFAULT_EXCLUDES));
        assert!(is_excluded("web/uploads/x", DEFAULT_EXCLUDES));
        assert!(!is_excluded("cachedir", DEFAULT_EXCLUDES));
        assert!(!is_excluded("web/index.php", DEFAULT_EXCLUDES));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_and_modes_survive() {
        use std::os::unix::fs::PermissionsExt;

        let src = source_tree(&[("symfony", "#!/usr/bin/env php"), ("data/a.txt", "a")]);
        fs::set_permissions(src.path().join("symfony"), fs::Permissions::from_mode(0o755))
            .unwrap();
        std::os::unix::fs::symlink("data/a.txt", src.path().join("link.txt")).unwrap();

        let snapshot =
            Snapshot::from_bytes(pack_dir(src.path(), Vec::new(), DEFAULT_EXCLUDES).unwrap());
        let target = tempfile::tempdir().unwrap();
        snapshot.extract_into(target.path()).unwrap();
        // A second pass tolerates the existing link and truncates files
        snapshot.extract_into(target.path()).unwrap();

        let mode = fs::metadata(target.path().join("symfony"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o111, 0o111);
        assert_eq!(
            fs::read_link(target.path().join("link.txt")).unwrap(),
            PathBuf::from("data/a.txt")
        );
        assert_eq!(fs::read_to_string(target.path().join("link.txt")).unwrap(), "a");
    }
}
