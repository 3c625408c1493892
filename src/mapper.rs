// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Entry transformations applied before archiving.

An [EntryMapper] is a pure, construction-time-configured transformation of
one [ArchiveEntry] into another. Data sources carry an ordered chain of
mappers and apply them to every entry they emit.

Within one mapper application the steps run in a fixed order: path segment
stripping, path prefixing, ownership override, permission override. Each
override only applies where a value was configured; everything else passes
through from the source entry. Size is always carried through unmodified.
*/

use crate::{
    entry::ArchiveEntry,
    error::{DebforgeError, Result},
};

/// Convert a 9 character `rwxrwxrwx` style permission string to mode bits.
///
/// Each triplet (owner/group/other) contributes `r=4, w=2, x=1`, scaled by
/// 64/8/1 respectively. `-` marks an absent bit. Any other character, or a
/// length other than 9, is an error.
pub fn mode_from_symbolic(perm: &str) -> Result<u32> {
    let chars = perm.chars().collect::<Vec<_>>();

    if chars.len() != 9 {
        return Err(DebforgeError::InvalidPermissionString(perm.to_string()));
    }

    let mut mode = 0;

    for (triplet, scale) in chars.chunks(3).zip([64, 8, 1]) {
        let mut n = 0;

        for (c, (expected, value)) in triplet.iter().zip([('r', 4), ('w', 2), ('x', 1)]) {
            if *c == expected {
                n += value;
            } else if *c != '-' {
                return Err(DebforgeError::InvalidPermissionString(perm.to_string()));
            }
        }

        mode += n * scale;
    }

    Ok(mode)
}

/// Parse an octal permission string to mode bits.
///
/// A leading `0` is tolerated. Empty or absent input yields `None`, the
/// "leave source permissions untouched" marker.
pub fn mode_from_octal_str(mode: Option<&str>) -> Result<Option<u32>> {
    match mode {
        None => Ok(None),
        Some("") => Ok(None),
        Some(s) => Ok(Some(u32::from_str_radix(s, 8)?)),
    }
}

/// Applies a uniform set of path, ownership, and permission rewrites.
#[derive(Clone, Debug, Default)]
pub struct EntryMapper {
    strip: usize,
    prefix: Option<String>,
    uid: Option<u32>,
    gid: Option<u32>,
    user: Option<String>,
    group: Option<String>,
    file_mode: Option<u32>,
    dir_mode: Option<u32>,
}

impl EntryMapper {
    /// Create a mapper that passes every entry through unchanged.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove the leading `strip` path segments from every entry path.
    ///
    /// Stripping more segments than a path has leaves the empty remainder;
    /// combined with a prefix the prefix becomes the whole path.
    pub fn strip(mut self, strip: usize) -> Self {
        self.strip = strip;
        self
    }

    /// Prepend a path prefix (separator inserted) to every entry path.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.prefix = Some(prefix.trim_end_matches('/').to_string());
        self
    }

    /// Force the numeric owner id on every entry.
    pub fn uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }

    /// Force the numeric group id on every entry.
    pub fn gid(mut self, gid: u32) -> Self {
        self.gid = Some(gid);
        self
    }

    /// Force the textual owner name on every entry.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Force the textual group name on every entry.
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Force permission bits on non-directory entries.
    pub fn file_mode(mut self, mode: u32) -> Self {
        self.file_mode = Some(mode);
        self
    }

    /// Force permission bits on directory entries.
    pub fn dir_mode(mut self, mode: u32) -> Self {
        self.dir_mode = Some(mode);
        self
    }

    /// Apply this mapper to an entry, producing the rewritten entry.
    pub fn map(&self, entry: ArchiveEntry) -> ArchiveEntry {
        let mut mapped = entry;

        mapped.path = self.map_path(&mapped.path);

        if let Some(uid) = self.uid {
            mapped.uid = uid;
        }
        if let Some(gid) = self.gid {
            mapped.gid = gid;
        }
        if let Some(user) = &self.user {
            mapped.user = user.clone();
        }
        if let Some(group) = &self.group {
            mapped.group = group.clone();
        }

        let mode_override = if mapped.is_directory() {
            self.dir_mode
        } else {
            self.file_mode
        };
        if let Some(mode) = mode_override {
            mapped.mode = mode;
        }

        mapped
    }

    fn map_path(&self, path: &str) -> String {
        let stripped = path
            .split('/')
            .filter(|s| !s.is_empty())
            .skip(self.strip)
            .collect::<Vec<_>>()
            .join("/");

        match &self.prefix {
            Some(prefix) if stripped.is_empty() => prefix.clone(),
            Some(prefix) => format!("{}/{}", prefix, stripped),
            None => stripped,
        }
    }
}

/// Run an entry through a chain of mappers, in order.
pub fn apply_chain(mappers: &[EntryMapper], entry: ArchiveEntry) -> ArchiveEntry {
    mappers
        .iter()
        .fold(entry, |entry, mapper| mapper.map(entry))
}

#[cfg(test)]
mod tests {
    use {super::*, crate::entry::EntryKind};

    #[test]
    fn symbolic_modes() -> Result<()> {
        assert_eq!(mode_from_symbolic("rwxrwxrwx")?, 0o777);
        assert_eq!(mode_from_symbolic("rw-r--r--")?, 0o644);
        assert_eq!(mode_from_symbolic("rwxr-xr-x")?, 0o755);
        assert_eq!(mode_from_symbolic("---------")?, 0);

        assert!(matches!(
            mode_from_symbolic("rw-r--r-"),
            Err(DebforgeError::InvalidPermissionString(_))
        ));
        assert!(matches!(
            mode_from_symbolic("rwzr--r--"),
            Err(DebforgeError::InvalidPermissionString(_))
        ));

        Ok(())
    }

    #[test]
    fn symbolic_mode_round_trips() -> Result<()> {
        fn to_symbolic(mode: u32) -> String {
            let mut s = String::with_capacity(9);
            for shift in [6, 3, 0] {
                let n = (mode >> shift) & 0o7;
                s.push(if n & 4 != 0 { 'r' } else { '-' });
                s.push(if n & 2 != 0 { 'w' } else { '-' });
                s.push(if n & 1 != 0 { 'x' } else { '-' });
            }
            s
        }

        for perm in ["rwxr-xr-x", "rw-r--r--", "r--------", "-w---x--x"] {
            assert_eq!(to_symbolic(mode_from_symbolic(perm)?), perm);
        }

        Ok(())
    }

    #[test]
    fn octal_modes() -> Result<()> {
        assert_eq!(mode_from_octal_str(Some("0755"))?, Some(0o755));
        assert_eq!(mode_from_octal_str(Some("644"))?, Some(0o644));
        assert_eq!(mode_from_octal_str(Some(""))?, None);
        assert_eq!(mode_from_octal_str(None)?, None);
        assert!(mode_from_octal_str(Some("89")).is_err());

        Ok(())
    }

    #[test]
    fn strip_and_prefix() {
        let mapper = EntryMapper::new().strip(2).prefix("/opt/app");

        let entry = mapper.map(ArchiveEntry::regular("a/b/c/file.txt", 10, 0o644));
        assert_eq!(entry.path, "/opt/app/c/file.txt");
        assert_eq!(entry.size, 10);

        // Stripping past the end leaves the prefix alone.
        let entry = mapper.map(ArchiveEntry::directory("a/b", 0o755));
        assert_eq!(entry.path, "/opt/app");
    }

    #[test]
    fn ownership_overrides_are_independent() {
        let entry = ArchiveEntry {
            uid: 500,
            gid: 600,
            ..ArchiveEntry::regular("f", 0, 0o644)
        };

        let mapped = EntryMapper::new().uid(1000).map(entry.clone());
        assert_eq!(mapped.uid, 1000);
        assert_eq!(mapped.gid, 600, "gid untouched by uid override");

        let mapped = EntryMapper::new().gid(1000).map(entry.clone());
        assert_eq!(mapped.uid, 500, "uid untouched by gid override");
        assert_eq!(mapped.gid, 1000);

        // No override leaves source ownership untouched.
        let mapped = EntryMapper::new().map(entry);
        assert_eq!((mapped.uid, mapped.gid), (500, 600));
    }

    #[test]
    fn mode_overrides_split_by_kind() {
        let mapper = EntryMapper::new().file_mode(0o600).dir_mode(0o700);

        let f = mapper.map(ArchiveEntry::regular("f", 0, 0o644));
        assert_eq!(f.mode, 0o600);

        let d = mapper.map(ArchiveEntry::directory("d", 0o755));
        assert_eq!(d.mode, 0o700);

        let l = mapper.map(ArchiveEntry::symlink("l", "f"));
        assert_eq!(l.kind, EntryKind::Symlink);
        assert_eq!(l.mode, 0o600, "links take the file mode override");
    }

    #[test]
    fn chain_applies_in_order() {
        let chain = vec![
            EntryMapper::new().strip(1),
            EntryMapper::new().prefix("opt"),
        ];

        let entry = apply_chain(&chain, ArchiveEntry::regular("build/bin/app", 1, 0o755));
        assert_eq!(entry.path, "opt/bin/app");
    }
}
