// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian binary package control files. */

use {
    crate::{
        control::{ControlFile, ControlParagraph},
        error::{DebforgeError, Result},
    },
    std::{
        io::BufRead,
        ops::{Deref, DerefMut},
    },
};

/// A Debian binary package control file/paragraph.
///
/// See <https://www.debian.org/doc/debian-policy/ch-controlfields.html#binary-package-control-files-debian-control>.
///
/// Binary package control files are defined by a single paragraph with
/// well-defined fields. This type is a low-level wrapper around an inner
/// [ControlParagraph]. [Deref] and [DerefMut] can be used to operate on the
/// inner [ControlParagraph]. [From] and [Into] are implemented in both
/// directions to enable cheap coercion between the types.
///
/// Fields that the package assembler must be able to rely on have getters
/// that return [Result] and error if the field is not present. Optional
/// fields return [Option].
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct BinaryPackageControlFile<'a> {
    paragraph: ControlParagraph<'a>,
}

impl<'a> Deref for BinaryPackageControlFile<'a> {
    type Target = ControlParagraph<'a>;

    fn deref(&self) -> &Self::Target {
        &self.paragraph
    }
}

impl<'a> DerefMut for BinaryPackageControlFile<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.paragraph
    }
}

impl<'a> From<ControlParagraph<'a>> for BinaryPackageControlFile<'a> {
    fn from(paragraph: ControlParagraph<'a>) -> Self {
        Self { paragraph }
    }
}

impl<'a> From<BinaryPackageControlFile<'a>> for ControlParagraph<'a> {
    fn from(cf: BinaryPackageControlFile<'a>) -> Self {
        cf.paragraph
    }
}

impl<'a> BinaryPackageControlFile<'a> {
    /// Parse the first paragraph from a reader into an instance.
    pub fn parse_reader<R: BufRead>(reader: &mut R) -> Result<BinaryPackageControlFile<'static>> {
        let control = ControlFile::parse_reader(reader)?;

        let paragraph = control
            .into_paragraphs()
            .next()
            .ok_or(DebforgeError::ControlFileNoParagraph)?;

        Ok(BinaryPackageControlFile { paragraph })
    }

    /// The `Package` field value.
    pub fn package(&self) -> Result<&str> {
        self.required_field_str("Package")
    }

    /// The `Version` field as its original string.
    pub fn version_str(&self) -> Result<&str> {
        self.required_field_str("Version")
    }

    /// The `Architecture` field.
    pub fn architecture(&self) -> Result<&str> {
        self.required_field_str("Architecture")
    }

    /// The `Maintainer` field.
    pub fn maintainer(&self) -> Result<&str> {
        self.required_field_str("Maintainer")
    }

    /// The `Description` field.
    pub fn description(&self) -> Result<&str> {
        self.required_field_str("Description")
    }

    /// The `Section` field.
    pub fn section(&self) -> Option<&str> {
        self.field_str("Section")
    }

    /// The `Priority` field.
    pub fn priority(&self) -> Option<&str> {
        self.field_str("Priority")
    }

    /// The `Installed-Size` field, parsed to a [u64].
    pub fn installed_size(&self) -> Option<Result<u64>> {
        self.field_u64("Installed-Size")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn getters() -> Result<()> {
        let mut paragraph = ControlParagraph::default();
        paragraph.set_field_from_string("Package".into(), "mypackage".into());
        paragraph.set_field_from_string("Version".into(), "0.1-1".into());
        paragraph.set_field_from_string("Architecture".into(), "amd64".into());

        let cf = BinaryPackageControlFile::from(paragraph);

        assert_eq!(cf.package()?, "mypackage");
        assert_eq!(cf.version_str()?, "0.1-1");
        assert_eq!(cf.architecture()?, "amd64");
        assert!(cf.section().is_none());
        assert!(matches!(
            cf.maintainer(),
            Err(DebforgeError::ControlRequiredFieldMissing("Maintainer"))
        ));

        Ok(())
    }
}
