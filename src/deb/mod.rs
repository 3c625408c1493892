// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Interfaces for .deb package files.

The .deb file specification lives at <https://manpages.debian.org/unstable/dpkg-dev/deb.5.en.html>.

A `.deb` binary package is an `ar` archive with members in a fixed order:

1. `debian-binary` holding the version of the binary package format.
2. `control.tar.gz` holding package metadata.
3. `data.tar[.<ext>]` holding file content.

[builder::PackageBuilder] creates packages; [reader::BinaryPackageReader]
reads them back.
*/

use {
    crate::{
        entry::{ArchiveEntry, EntryKind},
        error::Result,
    },
    std::io::{Read, Write},
};

pub mod builder;
pub mod reader;

/// Contents of the `debian-binary` ar member.
pub const DEBIAN_BINARY_VERSION: &[u8] = b"2.0\n";

/// Convert a byte total to the 1 KiB blocks recorded as `Installed-Size`.
///
/// Debian rounds up to the next whole block.
pub fn installed_size_blocks(bytes: u64) -> u64 {
    (bytes + 1023) / 1024
}

/// Build a tar header carrying an entry's metadata.
pub(crate) fn tar_header_for_entry(entry: &ArchiveEntry, mtime: u64) -> Result<tar::Header> {
    let mut header = tar::Header::new_gnu();
    header.set_uid(entry.uid as u64);
    header.set_gid(entry.gid as u64);
    header.set_username(&entry.user)?;
    header.set_groupname(&entry.group)?;
    header.set_mtime(mtime);
    header.set_mode(entry.mode);

    match entry.kind {
        EntryKind::Regular => {
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(entry.size);
        }
        EntryKind::Directory => {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
        }
        EntryKind::Symlink => {
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_size(0);
        }
        EntryKind::Hardlink => {
            header.set_entry_type(tar::EntryType::Link);
            header.set_size(0);
        }
    }

    if let Some(target) = &entry.link_target {
        header.set_link_name(target)?;
    }

    Ok(header)
}

/// Set the member name on a tar header, using Debian naming conventions.
pub(crate) fn set_header_path(
    builder: &mut tar::Builder<impl Write>,
    header: &mut tar::Header,
    path: &str,
    is_directory: bool,
) -> Result<()> {
    // Debian archives in the wild carry member names beginning with `./`,
    // and names ending in `/` are directories. `header.set_path()` would
    // normalize the `./` away on anything except the root directory, so the
    // name field is written directly.

    // Only GNU headers are in play here, which keeps the name handling simple.
    assert!(header.as_ustar().is_none());

    let value = format!("./{}{}", path, if is_directory { "/" } else { "" });
    let value_bytes = value.as_bytes();

    let name_buffer = &mut header.as_old_mut().name;

    // If it fits within the buffer, copy it over.
    if value_bytes.len() <= name_buffer.len() {
        name_buffer[0..value_bytes.len()].copy_from_slice(value_bytes);
    } else {
        // Too long for the header field; emit a GNU LongLink entry carrying
        // the full name, then truncate the in-header copy.
        let mut header2 = tar::Header::new_gnu();
        let name = b"././@LongLink";
        header2.as_gnu_mut().unwrap().name[..name.len()].clone_from_slice(&name[..]);
        header2.set_mode(0o644);
        header2.set_uid(0);
        header2.set_gid(0);
        header2.set_mtime(0);
        header2.set_size(value_bytes.len() as u64 + 1);
        header2.set_entry_type(tar::EntryType::new(b'L'));
        header2.set_cksum();
        let mut data = value_bytes.chain(std::io::repeat(0).take(1));
        builder.append(&header2, &mut data)?;

        let truncated_bytes = &value_bytes[0..name_buffer.len()];
        name_buffer[0..truncated_bytes.len()].copy_from_slice(truncated_bytes);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn installed_size_rounds_up() {
        assert_eq!(installed_size_blocks(0), 0);
        assert_eq!(installed_size_blocks(1), 1);
        assert_eq!(installed_size_blocks(1024), 1);
        assert_eq!(installed_size_blocks(1025), 2);
        assert_eq!(installed_size_blocks(10 * 1024), 10);
    }
}
