// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! .deb file reading functionality. */

use {
    crate::{
        binary_package_control::BinaryPackageControlFile,
        error::{DebforgeError, Result},
        io::reader_from_member_suffix,
    },
    std::{
        io::{Cursor, Read},
        ops::{Deref, DerefMut},
    },
};

/// A reader of .deb files.
///
/// Yields the ar members in file order, decoded to typed entries with
/// transparent decompression of the embedded tar archives.
pub struct BinaryPackageReader<R: Read> {
    archive: ar::Archive<R>,
}

impl<R: Read> BinaryPackageReader<R> {
    /// Construct a new instance from a reader.
    pub fn new(reader: R) -> Result<Self> {
        Ok(Self {
            archive: ar::Archive::new(reader),
        })
    }

    /// Obtain the next entry from the underlying ar archive.
    pub fn next_entry(&mut self) -> Option<Result<BinaryPackageEntry>> {
        let entry = self.archive.next_entry()?;

        let mut entry = match entry {
            Ok(entry) => entry,
            Err(e) => return Some(Err(e.into())),
        };

        // Member names should be ASCII, so converting to strings feels
        // reasonably safe.
        let filename = String::from_utf8_lossy(entry.header().identifier()).to_string();

        let mut data = vec![];
        if let Err(e) = entry.read_to_end(&mut data) {
            return Some(Err(e.into()));
        }

        let data = Cursor::new(data);

        if filename == "debian-binary" {
            Some(Ok(BinaryPackageEntry::DebianBinary(data)))
        } else if filename == "_gpgorigin" {
            Some(Ok(BinaryPackageEntry::Signature(data)))
        } else if let Some(suffix) = filename.strip_prefix("control.tar") {
            match reader_from_member_suffix(suffix, data) {
                Ok(reader) => Some(Ok(BinaryPackageEntry::Control(ControlTarReader {
                    archive: tar::Archive::new(reader),
                }))),
                Err(e) => Some(Err(e)),
            }
        } else if let Some(suffix) = filename.strip_prefix("data.tar") {
            match reader_from_member_suffix(suffix, data) {
                Ok(reader) => Some(Ok(BinaryPackageEntry::Data(DataTarReader {
                    archive: tar::Archive::new(reader),
                }))),
                Err(e) => Some(Err(e)),
            }
        } else {
            Some(Err(DebforgeError::DebUnknownBinaryPackageEntry(filename)))
        }
    }
}

/// Represents an entry in a .deb archive.
pub enum BinaryPackageEntry {
    /// The `debian-binary` file.
    DebianBinary(Cursor<Vec<u8>>),
    /// The `control.tar` tar archive.
    Control(ControlTarReader),
    /// The `data.tar[.<ext>]` tar archive.
    Data(DataTarReader),
    /// The `_gpgorigin` signature member of signed packages.
    Signature(Cursor<Vec<u8>>),
}

/// A reader for `control.tar` members.
pub struct ControlTarReader {
    archive: tar::Archive<Box<dyn Read>>,
}

impl Deref for ControlTarReader {
    type Target = tar::Archive<Box<dyn Read>>;

    fn deref(&self) -> &Self::Target {
        &self.archive
    }
}

impl DerefMut for ControlTarReader {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.archive
    }
}

/// A reader for `data.tar` members.
pub struct DataTarReader {
    archive: tar::Archive<Box<dyn Read>>,
}

impl Deref for DataTarReader {
    type Target = tar::Archive<Box<dyn Read>>;

    fn deref(&self) -> &Self::Target {
        &self.archive
    }
}

impl DerefMut for DataTarReader {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.archive
    }
}

/// Resolve the `control` file from the `control.tar` member of a `.deb`.
pub fn resolve_control_file(reader: impl Read) -> Result<BinaryPackageControlFile<'static>> {
    let mut reader = BinaryPackageReader::new(reader)?;

    while let Some(entry) = reader.next_entry() {
        if let BinaryPackageEntry::Control(mut control) = entry? {
            for member in control.entries()? {
                let mut member = member?;

                if member.path_bytes().as_ref() == b"./control" {
                    let mut data = vec![];
                    member.read_to_end(&mut data)?;

                    return BinaryPackageControlFile::parse_reader(&mut data.as_slice());
                }
            }
        }
    }

    Err(DebforgeError::ControlFileNotFound)
}
