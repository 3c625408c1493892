// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Data sources feeding package contents.

A [DataSource] pushes a sequence of ([ArchiveEntry], content reader) pairs
to an [EntryConsumer]. Four kinds of source exist as a closed set: a single
file, a recursively walked directory tree, an existing tarball that is
re-streamed entry by entry, and a synthetic symlink/hardlink declaration.

Every source carries its own include/exclude glob filters (evaluated against
the archive-relative path before mapping) and its own mapper chain (applied
before delivery). New source kinds are added as new [SourceKind] variants,
not as implementations of an open trait.
*/

use {
    crate::{
        entry::{normalize_path, ArchiveEntry, EntryKind},
        error::{DebforgeError, Result},
        io::Compression,
        mapper::{apply_chain, EntryMapper},
    },
    glob::Pattern,
    log::debug,
    std::{
        fs,
        io::Read,
        path::{Path, PathBuf},
    },
};

/// Receives entries and their content from a [DataSource].
pub trait EntryConsumer {
    /// Handle one entry.
    ///
    /// `reader` yields exactly [ArchiveEntry::size] bytes of content for
    /// regular files and nothing for other entry kinds.
    fn consume(&mut self, entry: ArchiveEntry, reader: &mut dyn Read) -> Result<()>;
}

#[derive(Clone, Debug)]
enum SourceKind {
    File {
        path: PathBuf,
        archive_path: String,
    },
    Directory {
        path: PathBuf,
        dereference: bool,
    },
    Tarball {
        path: PathBuf,
    },
    Link {
        path: String,
        target: String,
        symlink: bool,
    },
}

/// A configured source of package data.
///
/// Instances are immutable once constructed and shared read-only by the
/// archive builder.
#[derive(Clone, Debug)]
pub struct DataSource {
    kind: SourceKind,
    includes: Vec<Pattern>,
    excludes: Vec<Pattern>,
    mappers: Vec<EntryMapper>,
}

impl DataSource {
    fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            includes: vec![],
            excludes: vec![],
            mappers: vec![],
        }
    }

    /// A source emitting one regular file, installed at `archive_path`.
    ///
    /// Size and permission bits are read from the file system unless a
    /// mapper overrides them.
    pub fn file(path: impl Into<PathBuf>, archive_path: impl Into<String>) -> Self {
        Self::new(SourceKind::File {
            path: path.into(),
            archive_path: archive_path.into(),
        })
    }

    /// A source recursively walking a directory tree.
    ///
    /// The walk order is deterministic (lexicographic per directory) so
    /// repeated builds are reproducible. Symlinks are emitted as symlink
    /// entries and not followed; see [Self::dereference].
    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self::new(SourceKind::Directory {
            path: path.into(),
            dereference: false,
        })
    }

    /// A source re-streaming an existing tarball entry by entry.
    ///
    /// The codec is chosen from the filename extension (`.gz`, `.bz2`,
    /// `.xz`, plain otherwise). The archive is never fully materialized in
    /// memory.
    pub fn tarball(path: impl Into<PathBuf>) -> Self {
        Self::new(SourceKind::Tarball { path: path.into() })
    }

    /// A source emitting exactly one synthetic symlink entry.
    ///
    /// There is no backing file system object; ownership is the fixed
    /// `root`/0 placeholder.
    pub fn symlink(path: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(SourceKind::Link {
            path: path.into(),
            target: target.into(),
            symlink: true,
        })
    }

    /// A source emitting exactly one synthetic hard link entry.
    pub fn hardlink(path: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(SourceKind::Link {
            path: path.into(),
            target: target.into(),
            symlink: false,
        })
    }

    /// Follow symlinks encountered in a directory walk instead of emitting
    /// symlink entries. Only meaningful for directory sources.
    pub fn dereference(mut self, value: bool) -> Self {
        if let SourceKind::Directory { dereference, .. } = &mut self.kind {
            *dereference = value;
        }
        self
    }

    /// Restrict this source to paths matching any of the given globs.
    ///
    /// An empty include set selects everything.
    pub fn include(mut self, patterns: &[&str]) -> Result<Self> {
        for p in patterns {
            self.includes.push(Pattern::new(p)?);
        }
        Ok(self)
    }

    /// Drop paths matching any of the given globs.
    pub fn exclude(mut self, patterns: &[&str]) -> Result<Self> {
        for p in patterns {
            self.excludes.push(Pattern::new(p)?);
        }
        Ok(self)
    }

    /// Append a mapper to this source's chain.
    pub fn mapper(mut self, mapper: EntryMapper) -> Self {
        self.mappers.push(mapper);
        self
    }

    /// Check that the source's backing path exists.
    ///
    /// Returns a problem description suitable for aggregation into a
    /// configuration error. Link sources have no backing path.
    pub(crate) fn check(&self) -> Option<String> {
        match &self.kind {
            SourceKind::File { path, .. } if !path.is_file() => Some(format!(
                "file source {} does not exist or is not a file",
                path.display()
            )),
            SourceKind::Directory { path, .. } if !path.is_dir() => Some(format!(
                "directory source {} does not exist or is not a directory",
                path.display()
            )),
            SourceKind::Tarball { path } if !path.is_file() => Some(format!(
                "tarball source {} does not exist or is not a file",
                path.display()
            )),
            _ => None,
        }
    }

    /// A short human readable description, used in log and error context.
    pub fn describe(&self) -> String {
        match &self.kind {
            SourceKind::File { path, archive_path } => {
                format!("file {} -> {}", path.display(), archive_path)
            }
            SourceKind::Directory { path, .. } => format!("directory {}", path.display()),
            SourceKind::Tarball { path } => format!("tarball {}", path.display()),
            SourceKind::Link {
                path,
                target,
                symlink,
            } => format!(
                "{} {} -> {}",
                if *symlink { "symlink" } else { "hardlink" },
                path,
                target
            ),
        }
    }

    /// Push this source's entries and content to a consumer.
    pub fn produce(&self, consumer: &mut dyn EntryConsumer) -> Result<()> {
        debug!("producing entries from {}", self.describe());

        match &self.kind {
            SourceKind::File { path, archive_path } => {
                self.produce_file(path, archive_path, consumer)
            }
            SourceKind::Directory { path, dereference } => {
                self.walk_directory(path, path, *dereference, consumer)
            }
            SourceKind::Tarball { path } => self.produce_tarball(path, consumer),
            SourceKind::Link {
                path,
                target,
                symlink,
            } => {
                let entry = if *symlink {
                    ArchiveEntry::symlink(path.clone(), target.clone())
                } else {
                    ArchiveEntry::hardlink(path.clone(), target.clone())
                };

                self.deliver(entry, &mut std::io::empty(), consumer)
            }
        }
    }

    fn produce_file(
        &self,
        path: &Path,
        archive_path: &str,
        consumer: &mut dyn EntryConsumer,
    ) -> Result<()> {
        let metadata = fs::metadata(path).map_err(|e| unreadable(path, e))?;

        let mut entry = ArchiveEntry::regular(
            archive_path,
            metadata.len(),
            fs_mode(&metadata, 0o644),
        );
        (entry.uid, entry.gid) = fs_owner(&metadata);

        let mut file = fs::File::open(path).map_err(|e| unreadable(path, e))?;

        self.deliver(entry, &mut file, consumer)
    }

    fn walk_directory(
        &self,
        root: &Path,
        dir: &Path,
        dereference: bool,
        consumer: &mut dyn EntryConsumer,
    ) -> Result<()> {
        let mut children = fs::read_dir(dir)
            .map_err(|e| unreadable(dir, e))?
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(|e| unreadable(dir, e))?;

        children.sort_by_key(|c| c.file_name());

        for child in children {
            let path = child.path();
            let rel = relative_archive_path(root, &path);
            let metadata = fs::symlink_metadata(&path).map_err(|e| unreadable(&path, e))?;

            if metadata.file_type().is_symlink() && !dereference {
                let target = fs::read_link(&path).map_err(|e| unreadable(&path, e))?;

                let mut entry =
                    ArchiveEntry::symlink(rel, target.to_string_lossy().to_string());
                (entry.uid, entry.gid) = fs_owner(&metadata);

                self.deliver(entry, &mut std::io::empty(), consumer)?;
                continue;
            }

            // Either not a symlink or we are dereferencing; stat through.
            let metadata = fs::metadata(&path).map_err(|e| unreadable(&path, e))?;

            if metadata.is_dir() {
                let mut entry = ArchiveEntry::directory(rel, fs_mode(&metadata, 0o755));
                (entry.uid, entry.gid) = fs_owner(&metadata);

                self.deliver(entry, &mut std::io::empty(), consumer)?;
                self.walk_directory(root, &path, dereference, consumer)?;
            } else {
                let mut entry =
                    ArchiveEntry::regular(rel, metadata.len(), fs_mode(&metadata, 0o644));
                (entry.uid, entry.gid) = fs_owner(&metadata);

                let mut file = fs::File::open(&path).map_err(|e| unreadable(&path, e))?;

                self.deliver(entry, &mut file, consumer)?;
            }
        }

        Ok(())
    }

    fn produce_tarball(&self, path: &Path, consumer: &mut dyn EntryConsumer) -> Result<()> {
        let file = fs::File::open(path).map_err(|e| unreadable(path, e))?;
        let reader = Compression::from_path(path).decompress(file)?;

        let mut archive = tar::Archive::new(reader);

        for entry in archive.entries().map_err(|e| unreadable(path, e))? {
            let mut tar_entry = entry.map_err(|e| unreadable(path, e))?;

            let entry_path =
                String::from_utf8_lossy(tar_entry.path_bytes().as_ref()).to_string();

            let header = tar_entry.header();

            let kind = match header.entry_type() {
                tar::EntryType::Directory => EntryKind::Directory,
                tar::EntryType::Symlink => EntryKind::Symlink,
                tar::EntryType::Link => EntryKind::Hardlink,
                t if t.is_file() => EntryKind::Regular,
                // Metadata entries (pax headers, long names) are handled by
                // the tar reader itself and never re-emitted.
                _ => continue,
            };

            let size = if kind == EntryKind::Regular {
                header.size().map_err(|e| unreadable(path, e))?
            } else {
                0
            };

            let link_target = header
                .link_name()
                .map_err(|e| unreadable(path, e))?
                .map(|t| t.to_string_lossy().to_string());

            let entry = ArchiveEntry {
                path: normalize_path(entry_path.trim_end_matches('/')).to_string(),
                kind,
                size,
                mode: header.mode().map_err(|e| unreadable(path, e))? & 0o7777,
                uid: header.uid().map_err(|e| unreadable(path, e))? as u32,
                gid: header.gid().map_err(|e| unreadable(path, e))? as u32,
                user: header.username().ok().flatten().unwrap_or("").to_string(),
                group: header.groupname().ok().flatten().unwrap_or("").to_string(),
                link_target,
            };

            self.deliver(entry, &mut tar_entry, consumer)?;
        }

        Ok(())
    }

    fn deliver(
        &self,
        entry: ArchiveEntry,
        reader: &mut dyn Read,
        consumer: &mut dyn EntryConsumer,
    ) -> Result<()> {
        if !self.selected(entry.normalized_path()) {
            return Ok(());
        }

        let entry = apply_chain(&self.mappers, entry);

        consumer.consume(entry, reader)
    }

    fn selected(&self, path: &str) -> bool {
        let included =
            self.includes.is_empty() || self.includes.iter().any(|p| p.matches(path));

        included && !self.excludes.iter().any(|p| p.matches(path))
    }
}

fn unreadable(path: &Path, source: std::io::Error) -> DebforgeError {
    DebforgeError::SourceUnreadable {
        path: path.display().to_string(),
        source,
    }
}

fn relative_archive_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);

    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(unix)]
pub(crate) fn fs_mode(metadata: &fs::Metadata, _default: u32) -> u32 {
    use std::os::unix::fs::PermissionsExt;

    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
pub(crate) fn fs_mode(_metadata: &fs::Metadata, default: u32) -> u32 {
    default
}

#[cfg(unix)]
pub(crate) fn fs_owner(metadata: &fs::Metadata) -> (u32, u32) {
    use std::os::unix::fs::MetadataExt;

    (metadata.uid(), metadata.gid())
}

#[cfg(not(unix))]
pub(crate) fn fs_owner(_metadata: &fs::Metadata) -> (u32, u32) {
    (0, 0)
}

#[cfg(test)]
mod tests {
    use {super::*, std::io::Write};

    #[derive(Default)]
    struct Collector {
        entries: Vec<(ArchiveEntry, Vec<u8>)>,
    }

    impl Collector {
        fn paths(&self) -> Vec<&str> {
            self.entries.iter().map(|(e, _)| e.path.as_str()).collect()
        }
    }

    impl EntryConsumer for Collector {
        fn consume(&mut self, entry: ArchiveEntry, reader: &mut dyn Read) -> Result<()> {
            let mut content = vec![];
            reader.read_to_end(&mut content)?;
            self.entries.push((entry, content));

            Ok(())
        }
    }

    #[test]
    fn link_source_emits_fixed_owner() -> Result<()> {
        let mut collector = Collector::default();

        DataSource::symlink("usr/bin/app", "/opt/app/bin/app").produce(&mut collector)?;

        assert_eq!(collector.entries.len(), 1);
        let (entry, content) = &collector.entries[0];
        assert_eq!(entry.kind, EntryKind::Symlink);
        assert_eq!((entry.uid, entry.gid), (0, 0));
        assert_eq!(entry.user, "root");
        assert_eq!(entry.link_target.as_deref(), Some("/opt/app/bin/app"));
        assert!(content.is_empty());

        Ok(())
    }

    #[test]
    fn file_source_reads_content() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("app");
        fs::File::create(&path)?.write_all(b"#!/bin/sh\n")?;

        let mut collector = Collector::default();
        DataSource::file(&path, "bin/app").produce(&mut collector)?;

        assert_eq!(collector.entries.len(), 1);
        let (entry, content) = &collector.entries[0];
        assert_eq!(entry.path, "bin/app");
        assert_eq!(entry.size, 10);
        assert_eq!(content, b"#!/bin/sh\n");

        Ok(())
    }

    #[test]
    fn missing_file_is_source_unreadable() {
        let mut collector = Collector::default();

        let err = DataSource::file("/no/such/file", "bin/app")
            .produce(&mut collector)
            .unwrap_err();

        assert!(matches!(err, DebforgeError::SourceUnreadable { .. }));
    }

    #[test]
    fn directory_walk_is_deterministic() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("b.txt"), b"b")?;
        fs::write(dir.path().join("a.txt"), b"a")?;
        fs::create_dir(dir.path().join("sub"))?;
        fs::write(dir.path().join("sub/c.txt"), b"c")?;

        let mut collector = Collector::default();
        DataSource::directory(dir.path()).produce(&mut collector)?;

        assert_eq!(
            collector.paths(),
            vec!["a.txt", "b.txt", "sub", "sub/c.txt"]
        );
        assert!(collector.entries[2].0.is_directory());

        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn directory_walk_emits_symlinks() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("real.txt"), b"real")?;
        std::os::unix::fs::symlink("real.txt", dir.path().join("alias.txt"))?;

        let mut collector = Collector::default();
        DataSource::directory(dir.path()).produce(&mut collector)?;

        let (entry, _) = collector
            .entries
            .iter()
            .find(|(e, _)| e.path == "alias.txt")
            .unwrap();
        assert_eq!(entry.kind, EntryKind::Symlink);
        assert_eq!(entry.link_target.as_deref(), Some("real.txt"));

        // Dereferencing turns the symlink into file content.
        let mut collector = Collector::default();
        DataSource::directory(dir.path())
            .dereference(true)
            .produce(&mut collector)?;

        let (entry, content) = collector
            .entries
            .iter()
            .find(|(e, _)| e.path == "alias.txt")
            .unwrap();
        assert_eq!(entry.kind, EntryKind::Regular);
        assert_eq!(content, b"real");

        Ok(())
    }

    #[test]
    fn filters_are_evaluated_before_mapping() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("keep.txt"), b"k")?;
        fs::write(dir.path().join("drop.log"), b"d")?;

        let mut collector = Collector::default();
        DataSource::directory(dir.path())
            .exclude(&["*.log"])?
            .mapper(EntryMapper::new().prefix("opt/data"))
            .produce(&mut collector)?;

        assert_eq!(collector.paths(), vec!["opt/data/keep.txt"]);

        Ok(())
    }

    #[test]
    fn include_set_restricts() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("a.txt"), b"a")?;
        fs::write(dir.path().join("b.log"), b"b")?;
        fs::write(dir.path().join("c.txt"), b"c")?;

        let mut collector = Collector::default();
        DataSource::directory(dir.path())
            .include(&["*.txt"])?
            .produce(&mut collector)?;

        assert_eq!(collector.paths(), vec!["a.txt", "c.txt"]);

        Ok(())
    }

    #[test]
    fn tarball_source_restreams_entries() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let tar_path = dir.path().join("input.tar");

        {
            let mut builder = tar::Builder::new(fs::File::create(&tar_path)?);

            let mut header = tar::Header::new_gnu();
            header.set_path("docs/readme.md")?;
            header.set_size(5);
            header.set_mode(0o640);
            header.set_uid(123);
            header.set_gid(456);
            header.set_cksum();
            builder.append(&header, &b"hello"[..])?;

            builder.finish()?;
        }

        let mut collector = Collector::default();
        DataSource::tarball(&tar_path).produce(&mut collector)?;

        assert_eq!(collector.entries.len(), 1);
        let (entry, content) = &collector.entries[0];
        assert_eq!(entry.path, "docs/readme.md");
        assert_eq!(entry.mode, 0o640);
        assert_eq!((entry.uid, entry.gid), (123, 456));
        assert_eq!(content, b"hello");

        Ok(())
    }

    #[test]
    fn tarball_source_applies_filters_and_mappers() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let tar_path = dir.path().join("input.tar");

        {
            let mut builder = tar::Builder::new(fs::File::create(&tar_path)?);

            for (name, content) in [("a.txt", "a"), ("b.log", "b")] {
                let mut header = tar::Header::new_gnu();
                header.set_path(name)?;
                header.set_size(content.len() as u64);
                header.set_mode(0o644);
                header.set_uid(0);
                header.set_gid(0);
                header.set_cksum();
                builder.append(&header, content.as_bytes())?;
            }

            builder.finish()?;
        }

        let mut collector = Collector::default();
        DataSource::tarball(&tar_path)
            .exclude(&["*.log"])?
            .mapper(EntryMapper::new().prefix("srv").uid(33))
            .produce(&mut collector)?;

        assert_eq!(collector.paths(), vec!["srv/a.txt"]);
        assert_eq!(collector.entries[0].0.uid, 33);

        Ok(())
    }
}
