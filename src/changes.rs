// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Changes manifests.

A changes file is a control-file-like document describing the artifacts a
build produced, with per artifact sizes and checksums in its `Files:`,
`Checksums-Sha1:` and `Checksums-Sha256:` sections. Manifests are either
created fresh from a [PackageDescriptor] or loaded from an existing changes
file and extended; merging is idempotent and keyed by artifact filename.
*/

use {
    crate::{
        control::{ControlField, ControlParagraph, ControlParagraphReader},
        deb::builder::PackageDescriptor,
        error::{DebforgeError, Result},
    },
    log::info,
    std::io::{BufRead, Write},
};

/// Fields every serialized changes manifest must carry.
const MANDATORY_FIELDS: &[&str] = &[
    "Format",
    "Date",
    "Source",
    "Binary",
    "Architecture",
    "Version",
    "Distribution",
    "Maintainer",
    "Description",
];

/// Caller supplied metadata required when creating a manifest from scratch.
#[derive(Clone, Debug)]
pub struct ChangesMetadata {
    pub distribution: String,
    pub maintainer: String,
    pub description: String,
}

/// One row of a manifest's `Files:` section.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChangesFileEntry {
    pub md5: String,
    pub size: u64,
    pub section: String,
    pub priority: String,
    pub filename: String,
}

/// A changes manifest.
#[derive(Clone, Debug, Default)]
pub struct ChangesManifest {
    paragraph: ControlParagraph<'static>,
}

impl ChangesManifest {
    /// Load a manifest from existing changes file text.
    ///
    /// Key/value fields are preserved verbatim; only the file list sections
    /// are touched by later merges.
    pub fn parse_reader<R: BufRead>(reader: R) -> Result<Self> {
        let paragraph = ControlParagraphReader::new(reader)
            .next()
            .ok_or(DebforgeError::ControlFileNoParagraph)??;

        Ok(Self { paragraph })
    }

    /// Create a fresh manifest from a package descriptor.
    ///
    /// Identity fields come from the descriptor; everything the descriptor
    /// cannot know is caller supplied via [ChangesMetadata].
    pub fn from_descriptor(
        descriptor: &PackageDescriptor,
        metadata: &ChangesMetadata,
    ) -> Result<Self> {
        let mut manifest = Self::default();

        manifest
            .paragraph
            .set_field_from_string("Format".into(), "1.8".into());
        manifest
            .paragraph
            .set_field_from_string("Date".into(), chrono::Utc::now().to_rfc2822().into());
        manifest.paragraph.set_field_from_string(
            "Distribution".into(),
            metadata.distribution.clone().into(),
        );
        manifest
            .paragraph
            .set_field_from_string("Urgency".into(), "low".into());
        manifest
            .paragraph
            .set_field_from_string("Maintainer".into(), metadata.maintainer.clone().into());
        manifest
            .paragraph
            .set_field_from_string("Description".into(), metadata.description.clone().into());

        manifest.merge_descriptor(descriptor);

        Ok(manifest)
    }

    /// Merge a package descriptor's artifact records into this manifest.
    ///
    /// Identity fields are refreshed from the descriptor. File list rows are
    /// keyed by artifact filename: a row for a file already listed is
    /// overwritten with the freshly computed values, anything else is
    /// appended. Merging the same descriptor twice yields identical rows.
    pub fn merge_descriptor(&mut self, descriptor: &PackageDescriptor) {
        self.paragraph
            .set_field_from_string("Source".into(), descriptor.package.clone().into());
        self.paragraph
            .set_field_from_string("Binary".into(), descriptor.package.clone().into());
        self.paragraph.set_field_from_string(
            "Architecture".into(),
            descriptor.architecture.clone().into(),
        );
        self.paragraph
            .set_field_from_string("Version".into(), descriptor.version.clone().into());

        let artifact = &descriptor.artifact;

        self.upsert_row(
            "Files",
            format!(
                "{} {} {} {} {}",
                artifact.md5,
                artifact.size,
                descriptor.section.as_deref().unwrap_or("unknown"),
                descriptor.priority.as_deref().unwrap_or("optional"),
                artifact.filename
            ),
            &artifact.filename,
        );
        self.upsert_row(
            "Checksums-Sha1",
            format!("{} {} {}", artifact.sha1, artifact.size, artifact.filename),
            &artifact.filename,
        );
        self.upsert_row(
            "Checksums-Sha256",
            format!(
                "{} {} {}",
                artifact.sha256, artifact.size, artifact.filename
            ),
            &artifact.filename,
        );
    }

    fn upsert_row(&mut self, field: &'static str, new_row: String, filename: &str) {
        let mut rows = self
            .paragraph
            .field(field)
            .map(|f| {
                f.iter_lines()
                    .filter(|l| !l.is_empty())
                    .map(String::from)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let mut replaced = false;
        for row in rows.iter_mut() {
            if row.split_ascii_whitespace().last() == Some(filename) {
                *row = new_row.clone();
                replaced = true;
            }
        }
        if !replaced {
            rows.push(new_row);
        }

        self.paragraph
            .set_field(ControlField::from_lines(field.into(), rows.into_iter()));
    }

    /// The parsed `Files:` section rows.
    pub fn files(&self) -> Vec<ChangesFileEntry> {
        self.paragraph
            .field("Files")
            .map(|f| {
                f.iter_lines()
                    .filter_map(|line| {
                        let words = line.split_ascii_whitespace().collect::<Vec<_>>();

                        match words.as_slice() {
                            [md5, size, section, priority, filename] => Some(ChangesFileEntry {
                                md5: md5.to_string(),
                                size: size.parse().ok()?,
                                section: section.to_string(),
                                priority: priority.to_string(),
                                filename: filename.to_string(),
                            }),
                            _ => None,
                        }
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Access the underlying paragraph.
    pub fn paragraph(&self) -> &ControlParagraph<'static> {
        &self.paragraph
    }

    /// Verify every mandatory field is present.
    pub fn assert_complete(&self) -> Result<()> {
        for field in MANDATORY_FIELDS.iter().copied() {
            if !self.paragraph.has_field(field) {
                return Err(DebforgeError::IncompleteManifest(field));
            }
        }

        Ok(())
    }

    /// Serialize the manifest to a writer.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.assert_complete()?;
        self.paragraph.write(writer)?;

        Ok(())
    }

    /// Serialize the manifest with a cleartext signature wrapping the body.
    pub fn to_clearsigned(&self, signer: &crate::signer::Signer) -> Result<String> {
        self.assert_complete()?;

        signer.clearsign(&self.paragraph.to_string())
    }

    /// Write the manifest to a file, optionally cleartext signed.
    ///
    /// The text (and signature, when a signer is supplied) is produced in
    /// full before anything touches the file system, then written to a
    /// temporary file and renamed into place. A signing failure never
    /// leaves a half-signed changes file behind.
    pub fn write_to_path(
        &self,
        path: &std::path::Path,
        signer: Option<&crate::signer::Signer>,
    ) -> Result<()> {
        info!("creating changes file {}", path.display());

        let text = match signer {
            Some(signer) => self.to_clearsigned(signer)?,
            None => {
                self.assert_complete()?;
                self.paragraph.to_string()
            }
        };

        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => std::path::Path::new("."),
        };

        let mut staging = tempfile::NamedTempFile::new_in(parent)?;
        staging.write_all(text.as_bytes())?;
        staging
            .persist(path)
            .map_err(|e| DebforgeError::Io(e.error))?;

        Ok(())
    }
}

impl ToString for ChangesManifest {
    fn to_string(&self) -> String {
        self.paragraph.to_string()
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::deb::builder::FileRecord,
        indoc::indoc,
        std::collections::BTreeMap,
    };

    fn descriptor() -> PackageDescriptor {
        PackageDescriptor {
            package: "test-package".to_string(),
            version: "1.0".to_string(),
            architecture: "all".to_string(),
            section: Some("utils".to_string()),
            priority: None,
            installed_size: 3,
            data_checksums: BTreeMap::new(),
            artifact: FileRecord {
                filename: "test-package_1.0_all.deb".to_string(),
                size: 2048,
                md5: "d41d8cd98f00b204e9800998ecf8427e".to_string(),
                sha1: "da39a3ee5e6b4b0d3255bfef95601890afd80709".to_string(),
                sha256: "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
                    .to_string(),
            },
        }
    }

    fn metadata() -> ChangesMetadata {
        ChangesMetadata {
            distribution: "unstable".to_string(),
            maintainer: "Someone <someone@example.com>".to_string(),
            description: "a package used by the test suite".to_string(),
        }
    }

    #[test]
    fn fresh_manifest_is_complete() -> Result<()> {
        let manifest = ChangesManifest::from_descriptor(&descriptor(), &metadata())?;

        manifest.assert_complete()?;

        let files = manifest.files();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "test-package_1.0_all.deb");
        assert_eq!(files[0].size, 2048);
        assert_eq!(files[0].section, "utils");
        assert_eq!(files[0].priority, "optional");

        Ok(())
    }

    #[test]
    fn merge_is_idempotent() -> Result<()> {
        let descriptor = descriptor();

        let mut manifest = ChangesManifest::from_descriptor(&descriptor, &metadata())?;
        let first = manifest.to_string();

        manifest.merge_descriptor(&descriptor);
        let second = manifest.to_string();

        assert_eq!(manifest.files().len(), 1);
        assert_eq!(first, second);

        Ok(())
    }

    #[test]
    fn merge_preserves_existing_fields() -> Result<()> {
        let existing = indoc! {"
            Format: 1.8
            Date: Tue, 12 Apr 2022 09:00:00 +0000
            Source: test-package
            Binary: test-package
            Architecture: all
            Version: 0.9
            Distribution: stable
            Urgency: high
            Maintainer: Someone <someone@example.com>
            Changed-By: Someone Else <else@example.com>
            Description: a package used by the test suite
            Files:
             0123456789abcdef0123456789abcdef 99 utils optional test-package_1.0_all.deb
             fedcba9876543210fedcba9876543210 10 utils optional other.tar.gz
        "};

        let mut manifest = ChangesManifest::parse_reader(existing.as_bytes())?;
        manifest.merge_descriptor(&descriptor());
        manifest.assert_complete()?;

        // Preserved verbatim.
        assert_eq!(manifest.paragraph().field_str("Distribution"), Some("stable"));
        assert_eq!(
            manifest.paragraph().field_str("Changed-By"),
            Some("Someone Else <else@example.com>")
        );

        // Refreshed from the descriptor.
        assert_eq!(manifest.paragraph().field_str("Version"), Some("1.0"));

        let files = manifest.files();
        assert_eq!(files.len(), 2);

        let row = files
            .iter()
            .find(|f| f.filename == "test-package_1.0_all.deb")
            .unwrap();
        assert_eq!(row.md5, "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(row.size, 2048);

        // Unrelated rows survive.
        assert!(files.iter().any(|f| f.filename == "other.tar.gz"));

        Ok(())
    }

    #[test]
    fn write_to_path_round_trips() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("test.changes");

        let manifest = ChangesManifest::from_descriptor(&descriptor(), &metadata())?;
        manifest.write_to_path(&path, None)?;

        let reparsed = ChangesManifest::parse_reader(std::fs::read(&path)?.as_slice())?;
        assert_eq!(reparsed.files(), manifest.files());
        assert_eq!(
            reparsed.paragraph().field_str("Distribution"),
            Some("unstable")
        );

        Ok(())
    }

    #[test]
    fn incomplete_manifest_names_missing_field() {
        let manifest = ChangesManifest::default();

        assert!(matches!(
            manifest.assert_complete(),
            Err(DebforgeError::IncompleteManifest("Format"))
        ));

        let mut buffer = vec![];
        assert!(manifest.write(&mut buffer).is_err());
        assert!(buffer.is_empty());
    }
}
