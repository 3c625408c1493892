// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Create .deb package files and their components. */

use {
    crate::{
        binary_package_control::BinaryPackageControlFile,
        deb::{
            installed_size_blocks, set_header_path, tar_header_for_entry, DEBIAN_BINARY_VERSION,
        },
        entry::{ArchiveEntry, EntryKind},
        error::{DebforgeError, Result},
        io::{digest_reader, Compression, DigestingReader},
        producer::{fs_mode, DataSource, EntryConsumer},
        signer::Signer,
    },
    log::info,
    std::{
        collections::{BTreeMap, BTreeSet},
        fs,
        io::{Cursor, Read, Write},
        path::{Path, PathBuf},
        time::SystemTime,
    },
};

/// Size and digest of one data tar entry, computed while streaming.
///
/// Digests cover the exact bytes written, before compression. Records are
/// immutable once the owning archive member has been fully written.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DataEntryRecord {
    pub size: u64,
    pub md5: String,
}

/// Size and digests of one produced artifact, as recorded in changes files.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileRecord {
    pub filename: String,
    pub size: u64,
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
}

/// Describes a package produced by a successful build.
///
/// Identity fields are read from the control file, never re-derived.
#[derive(Clone, Debug)]
pub struct PackageDescriptor {
    pub package: String,
    pub version: String,
    pub architecture: String,
    pub section: Option<String>,
    pub priority: Option<String>,
    /// Sum of regular data entry sizes, in 1 KiB blocks rounded up.
    pub installed_size: u64,
    /// Per data entry size/digest table, keyed by archive path.
    pub data_checksums: BTreeMap<String, DataEntryRecord>,
    /// Checksum record for the emitted `.deb` file itself.
    pub artifact: FileRecord,
}

/// Immutable configuration for one package build.
///
/// All configuration is collected up front; [BuildConfig::validate] surfaces
/// every configuration problem together, before any I/O side effect.
#[derive(Clone, Debug)]
pub struct BuildConfig {
    control_dir: PathBuf,
    sources: Vec<DataSource>,
    compression: Compression,
    mtime: Option<SystemTime>,
}

impl BuildConfig {
    /// Start a configuration from the control directory path.
    pub fn new(control_dir: impl Into<PathBuf>) -> Self {
        Self {
            control_dir: control_dir.into(),
            sources: vec![],
            compression: Compression::Gzip,
            mtime: None,
        }
    }

    /// Add a data source. Source order is significant and preserved.
    pub fn source(mut self, source: DataSource) -> Self {
        self.sources.push(source);
        self
    }

    /// Set the compression format for the data tar.
    ///
    /// The control tar is always gzip compressed regardless of this setting,
    /// for tool compatibility.
    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Set the modified time to use on archive members.
    ///
    /// If this is called, all archive members will use the specified time,
    /// helping to make archive content deterministic.
    ///
    /// If not called, the current time will be used.
    pub fn mtime(mut self, time: Option<SystemTime>) -> Self {
        self.mtime = time;
        self
    }

    /// Check the whole configuration, aggregating every problem found.
    pub fn validate(&self) -> Result<()> {
        let mut problems = vec![];

        if !self.control_dir.is_dir() {
            problems.push(format!(
                "\"{}\" is not a valid control directory",
                self.control_dir.display()
            ));
        } else if !self.control_dir.join("control").is_file() {
            problems.push(format!(
                "control directory {} lacks a control file",
                self.control_dir.display()
            ));
        }

        for source in &self.sources {
            if let Some(problem) = source.check() {
                problems.push(problem);
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(DebforgeError::Configuration(problems))
        }
    }
}

/// Builds `.deb` package files from a validated [BuildConfig].
///
/// The builder exclusively owns the output stream and compressor pipeline
/// for the duration of a build. Output is written to a temporary file next
/// to the destination and renamed into place only on success; a failed
/// build never leaves a caller-visible artifact.
pub struct PackageBuilder {
    config: BuildConfig,
}

impl PackageBuilder {
    /// Construct a builder, validating the configuration atomically.
    pub fn new(config: BuildConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self { config })
    }

    /// Build the package, writing the `.deb` file to `output`.
    pub fn build(&self, output: &Path) -> Result<PackageDescriptor> {
        self.build_internal(output, None)
    }

    /// Build the package and embed a clearsigned copy of its control data.
    ///
    /// The signature is carried as a fourth ar member named `_gpgorigin`
    /// following `data.tar`. Signing failures abort the build before any
    /// output file is written.
    pub fn build_signed(&self, output: &Path, signer: &Signer) -> Result<PackageDescriptor> {
        self.build_internal(output, Some(signer))
    }

    fn build_internal(&self, output: &Path, signer: Option<&Signer>) -> Result<PackageDescriptor> {
        info!("creating Debian package {}", output.display());

        let control_text = self.read_control_text()?;
        let control_file = BinaryPackageControlFile::parse_reader(&mut control_text.as_bytes())?;

        let mtime = self.mtime_secs();

        // Data tar first: the control tar's md5sums member derives from it.
        let mut data_writer = DataTarWriter::new(Vec::new(), mtime)?;
        for source in &self.config.sources {
            source
                .produce(&mut data_writer)
                .map_err(|e| DebforgeError::PackagingFailure {
                    context: source.describe(),
                    source: Box::new(e),
                })?;
        }
        let (data_tar, records, installed_bytes) = data_writer.finish()?;

        let data_tar = self.config.compression.compress(&mut Cursor::new(data_tar))?;

        let control_tar = self.build_control_tar(&records, mtime)?;
        let control_tar = Compression::Gzip.compress(&mut Cursor::new(control_tar))?;

        // Sign before anything is written so signing failures leave nothing
        // behind.
        let origin = signer
            .map(|signer| signer.clearsign(&control_text))
            .transpose()?;

        let parent = match output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let staging = tempfile::NamedTempFile::new_in(parent)?;

        {
            let mut ar_builder = ar::Builder::new(staging.as_file());

            append_ar_member(
                &mut ar_builder,
                b"debian-binary".to_vec(),
                DEBIAN_BINARY_VERSION,
                mtime,
            )?;
            append_ar_member(
                &mut ar_builder,
                b"control.tar.gz".to_vec(),
                &control_tar,
                mtime,
            )?;
            append_ar_member(
                &mut ar_builder,
                format!("data.tar{}", self.config.compression.extension()).into_bytes(),
                &data_tar,
                mtime,
            )?;

            if let Some(origin) = &origin {
                append_ar_member(
                    &mut ar_builder,
                    b"_gpgorigin".to_vec(),
                    origin.as_bytes(),
                    mtime,
                )?;
            }
        }

        let (artifact_size, artifact_digest) = {
            let mut reader = staging.reopen()?;
            digest_reader(&mut reader)?
        };

        staging
            .persist(output)
            .map_err(|e| DebforgeError::Io(e.error))?;

        let artifact = FileRecord {
            filename: output
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            size: artifact_size,
            md5: artifact_digest.md5.digest_hex(),
            sha1: artifact_digest.sha1.digest_hex(),
            sha256: artifact_digest.sha256.digest_hex(),
        };

        Ok(PackageDescriptor {
            package: control_file.package()?.to_string(),
            version: control_file.version_str()?.to_string(),
            architecture: control_file.architecture()?.to_string(),
            section: control_file.section().map(String::from),
            priority: control_file.priority().map(String::from),
            installed_size: installed_size_blocks(installed_bytes),
            data_checksums: records,
            artifact,
        })
    }

    fn mtime_secs(&self) -> u64 {
        self.config
            .mtime
            .unwrap_or_else(SystemTime::now)
            .duration_since(std::time::UNIX_EPOCH)
            .expect("times before UNIX epoch not accepted")
            .as_secs()
    }

    fn read_control_text(&self) -> Result<String> {
        let dir = &self.config.control_dir;

        if !dir.is_dir() {
            return Err(DebforgeError::InvalidControlDirectory(
                dir.display().to_string(),
            ));
        }

        let control = dir.join("control");
        if !control.is_file() {
            return Err(DebforgeError::ControlFileNotFound);
        }

        Ok(fs::read_to_string(control)?)
    }

    /// Serialize the control tar.
    ///
    /// Membership is the control directory's direct regular file children
    /// (never filtered or mapped) plus a generated `md5sums` member indexing
    /// every regular data entry.
    fn build_control_tar(
        &self,
        records: &BTreeMap<String, DataEntryRecord>,
        mtime: u64,
    ) -> Result<Vec<u8>> {
        let mut members: BTreeMap<String, (Vec<u8>, u32)> = BTreeMap::new();

        for child in fs::read_dir(&self.config.control_dir)? {
            let child = child?;
            let metadata = child.metadata()?;

            if !metadata.is_file() {
                continue;
            }

            let name = child.file_name().to_string_lossy().to_string();
            let data = fs::read(child.path())?;

            // Maintainer scripts keep their executable bit.
            let mode = if fs_mode(&metadata, 0o644) & 0o111 != 0 {
                0o755
            } else {
                0o644
            };

            members.insert(name, (data, mode));
        }

        let mut md5sums = String::new();
        for (path, record) in records {
            md5sums.push_str(&format!("{}  {}\n", record.md5, path));
        }
        members.insert("md5sums".to_string(), (md5sums.into_bytes(), 0o644));

        let mut archive = tar::Builder::new(Vec::new());
        append_root_entry(&mut archive, mtime)?;

        for (name, (data, mode)) in &members {
            let entry = ArchiveEntry::regular(name.clone(), data.len() as u64, *mode);

            let mut header = tar_header_for_entry(&entry, mtime)?;
            set_header_path(&mut archive, &mut header, name, false)?;
            header.set_cksum();
            archive.append(&header, data.as_slice())?;
        }

        Ok(archive.into_inner()?)
    }
}

fn append_ar_member<W: Write>(
    builder: &mut ar::Builder<W>,
    name: Vec<u8>,
    data: &[u8],
    mtime: u64,
) -> Result<()> {
    let mut header = ar::Header::new(name, data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(mtime);
    header.set_uid(0);
    header.set_gid(0);
    builder.append(&header, data)?;

    Ok(())
}

fn append_root_entry(builder: &mut tar::Builder<impl Write>, mtime: u64) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_uid(0);
    header.set_gid(0);
    header.set_username("root")?;
    header.set_groupname("root")?;
    header.set_mtime(mtime);
    header.set_entry_type(tar::EntryType::Directory);
    header.set_path("./")?;
    header.set_mode(0o755);
    header.set_size(0);
    header.set_cksum();
    builder.append(&header, &mut std::io::empty())?;

    Ok(())
}

/// Streams produced entries into a data tar, accumulating per path size and
/// digest plus the installed byte total as a side effect of writing.
struct DataTarWriter<W: Write> {
    archive: tar::Builder<W>,
    mtime: u64,
    seen_dirs: BTreeSet<String>,
    records: BTreeMap<String, DataEntryRecord>,
    installed_bytes: u64,
}

impl<W: Write> DataTarWriter<W> {
    fn new(writer: W, mtime: u64) -> Result<Self> {
        let mut archive = tar::Builder::new(writer);
        append_root_entry(&mut archive, mtime)?;

        Ok(Self {
            archive,
            mtime,
            seen_dirs: BTreeSet::new(),
            records: BTreeMap::new(),
            installed_bytes: 0,
        })
    }

    /// Emit directory members for any path components not yet seen.
    ///
    /// Producers emitting bare files (file sources, mapped prefixes) still
    /// yield an archive where every parent directory exists.
    fn ensure_parent_dirs(&mut self, path: &str) -> Result<()> {
        let components = path.split('/').collect::<Vec<_>>();

        for i in 1..components.len() {
            let dir = components[0..i].join("/");

            if self.seen_dirs.insert(dir.clone()) {
                let entry = ArchiveEntry::directory(dir.clone(), 0o755);

                let mut header = tar_header_for_entry(&entry, self.mtime)?;
                set_header_path(&mut self.archive, &mut header, &dir, true)?;
                header.set_cksum();
                self.archive.append(&header, &mut std::io::empty())?;
            }
        }

        Ok(())
    }

    fn finish(self) -> Result<(W, BTreeMap<String, DataEntryRecord>, u64)> {
        let inner = self.archive.into_inner()?;

        Ok((inner, self.records, self.installed_bytes))
    }
}

impl<W: Write> EntryConsumer for DataTarWriter<W> {
    fn consume(&mut self, entry: ArchiveEntry, reader: &mut dyn Read) -> Result<()> {
        let path = entry.normalized_path().to_string();

        // Mapping can collapse an entry onto the archive root.
        if path.is_empty() {
            return Ok(());
        }

        self.ensure_parent_dirs(&path)?;

        match entry.kind {
            EntryKind::Directory => {
                if self.seen_dirs.insert(path.clone()) {
                    let mut header = tar_header_for_entry(&entry, self.mtime)?;
                    set_header_path(&mut self.archive, &mut header, &path, true)?;
                    header.set_cksum();
                    self.archive.append(&header, &mut std::io::empty())?;
                }
            }
            EntryKind::Symlink | EntryKind::Hardlink => {
                let mut header = tar_header_for_entry(&entry, self.mtime)?;
                set_header_path(&mut self.archive, &mut header, &path, false)?;
                header.set_cksum();
                self.archive.append(&header, &mut std::io::empty())?;
            }
            EntryKind::Regular => {
                let mut header = tar_header_for_entry(&entry, self.mtime)?;
                set_header_path(&mut self.archive, &mut header, &path, false)?;
                header.set_cksum();

                let mut digesting = DigestingReader::new(reader);
                self.archive.append(&header, &mut digesting)?;

                let (_, digest, bytes_read) = digesting.finish();

                if bytes_read != entry.size {
                    return Err(DebforgeError::ShortRead {
                        path,
                        expected: entry.size,
                        got: bytes_read,
                    });
                }

                self.installed_bytes += entry.size;
                self.records.insert(
                    path,
                    DataEntryRecord {
                        size: entry.size,
                        md5: digest.md5.digest_hex(),
                    },
                );
            }
        }

        Ok(())
    }
}
