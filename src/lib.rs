// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian binary package assembly and changes file signing.

This crate assembles `.deb` package files and their associated, optionally
signed, changes files from heterogeneous data sources. It is a library;
build tool front ends collect configuration (paths, key ids, passphrases)
and drive the types defined here.

# A Tour of Functionality

Package contents are described by [entry::ArchiveEntry] records produced by
[producer::DataSource] values. Four kinds of source exist: a single file, a
recursively walked directory tree, an existing tarball re-streamed entry by
entry, and a synthetic symlink/hardlink declaration. Every source carries
glob include/exclude filters and a chain of [mapper::EntryMapper]
transformations (path stripping/prefixing, ownership and permission
overrides) applied to each entry before delivery.

[deb::builder::PackageBuilder] turns a validated [deb::builder::BuildConfig]
into a `.deb` file: sources are drained in caller order into a data tar
compressed with the selected [io::Compression] codec, the control
directory's files become the always-gzip `control.tar.gz` (with a generated
`md5sums` member), and both land in an `ar` container behind the
`debian-binary` version member. Checksums and sizes are accumulated while
streaming and returned on a [deb::builder::PackageDescriptor].
[deb::reader::BinaryPackageReader] reads packages back.

[changes::ChangesManifest] collects a descriptor's artifact checksums into a
changes manifest, either fresh or merged idempotently into an existing
file's manifest. [signer::Signer] unlocks a secret key from keyring bytes
and produces the detached and cleartext signatures used for signed packages
and changes files.

Control file primitives live in [control]; [binary_package_control]
wraps the package-level `control` paragraph with typed accessors.

# Determinism

Given fixed input and a fixed [deb::builder::BuildConfig::mtime], builds
are byte-for-byte reproducible: directory walks are lexicographically
ordered and archive members carry fixed metadata.
*/

pub mod binary_package_control;
pub mod changes;
pub mod control;
pub mod deb;
pub mod entry;
pub mod error;
pub mod io;
pub mod mapper;
pub mod producer;
pub mod signer;
