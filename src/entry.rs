// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The archive entry model.

Every member that ends up in a package's data tar is described by an
[ArchiveEntry] before it is written: its archive-relative path, what kind of
member it is, its size and permission bits, and its ownership. Data
producers create entries, mappers rewrite them, and the archive builder
serializes them.
*/

/// The kind of archive member an entry describes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EntryKind {
    /// A regular file with byte content.
    Regular,
    /// A directory.
    Directory,
    /// A symbolic link to [ArchiveEntry::link_target].
    Symlink,
    /// A hard link to [ArchiveEntry::link_target].
    Hardlink,
}

/// Describes a single archive member.
///
/// `path` is archive relative and forward-slash separated. Mappers may
/// produce paths with a leading `/`; [ArchiveEntry::normalized_path] is the
/// form serialized into archives and evaluated against filters.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArchiveEntry {
    pub path: String,
    pub kind: EntryKind,
    /// Content size in bytes. Always 0 for directories and links.
    pub size: u64,
    /// Permission bits (12 bit value).
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub user: String,
    pub group: String,
    /// Target path, only present for symlinks and hard links.
    pub link_target: Option<String>,
}

impl ArchiveEntry {
    /// Create a regular file entry owned by root.
    pub fn regular(path: impl Into<String>, size: u64, mode: u32) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Regular,
            size,
            mode,
            uid: 0,
            gid: 0,
            user: "root".to_string(),
            group: "root".to_string(),
            link_target: None,
        }
    }

    /// Create a directory entry owned by root.
    pub fn directory(path: impl Into<String>, mode: u32) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Directory,
            size: 0,
            mode,
            uid: 0,
            gid: 0,
            user: "root".to_string(),
            group: "root".to_string(),
            link_target: None,
        }
    }

    /// Create a symlink entry owned by root.
    pub fn symlink(path: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Symlink,
            size: 0,
            mode: 0o777,
            uid: 0,
            gid: 0,
            user: "root".to_string(),
            group: "root".to_string(),
            link_target: Some(target.into()),
        }
    }

    /// Create a hard link entry owned by root.
    pub fn hardlink(path: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::Hardlink,
            ..Self::symlink(path, target)
        }
    }

    /// Whether this entry describes a directory.
    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Whether this entry describes a regular file.
    pub fn is_regular(&self) -> bool {
        self.kind == EntryKind::Regular
    }

    /// The entry path without leading `/` or `./` components.
    pub fn normalized_path(&self) -> &str {
        normalize_path(&self.path)
    }
}

/// Strip leading `/` and `./` from an archive path.
pub(crate) fn normalize_path(path: &str) -> &str {
    let mut p = path;

    loop {
        if let Some(rest) = p.strip_prefix("./") {
            p = rest;
        } else if let Some(rest) = p.strip_prefix('/') {
            p = rest;
        } else {
            break;
        }
    }

    p
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_normalization() {
        assert_eq!(normalize_path("/opt/app/file"), "opt/app/file");
        assert_eq!(normalize_path("./a/b"), "a/b");
        assert_eq!(normalize_path(".//a"), "a");
        assert_eq!(normalize_path("a/b"), "a/b");
        assert_eq!(normalize_path("/"), "");
    }

    #[test]
    fn constructors() {
        let f = ArchiveEntry::regular("bin/app", 42, 0o755);
        assert!(f.is_regular());
        assert_eq!(f.size, 42);
        assert_eq!((f.uid, f.gid), (0, 0));
        assert_eq!(f.user, "root");

        let l = ArchiveEntry::symlink("usr/bin/app", "/opt/app/bin/app");
        assert_eq!(l.kind, EntryKind::Symlink);
        assert_eq!(l.size, 0);
        assert_eq!(l.link_target.as_deref(), Some("/opt/app/bin/app"));

        let h = ArchiveEntry::hardlink("usr/bin/app2", "usr/bin/app");
        assert_eq!(h.kind, EntryKind::Hardlink);
    }
}
