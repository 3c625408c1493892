// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use thiserror::Error;

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum DebforgeError {
    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("PGP error: {0:?}")]
    Pgp(#[from] pgp::errors::Error),

    #[error("glob pattern error: {0:?}")]
    Pattern(#[from] glob::PatternError),

    #[error("integer parsing error: {0:?}")]
    ParseInt(#[from] std::num::ParseIntError),

    #[error("invalid build configuration: {}", .0.join("; "))]
    Configuration(Vec<String>),

    #[error("\"{0}\" is not a valid control directory")]
    InvalidControlDirectory(String),

    #[error("compression method '{0}' is not supported")]
    UnsupportedCompression(String),

    #[error("cannot read source {path}: {source}")]
    SourceUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("short read on {path}: expected {expected} bytes, got {got}")]
    ShortRead {
        path: String,
        expected: u64,
        got: u64,
    },

    #[error("failed to package {context}: {source}")]
    PackagingFailure {
        context: String,
        #[source]
        source: Box<DebforgeError>,
    },

    #[error("key {0} not found in keyring")]
    KeyNotFound(String),

    #[error("passphrase does not unlock key {0}")]
    BadPassphrase(String),

    #[error("keyring is malformed: {0}")]
    UnreadableKeyring(String),

    #[error("changes manifest lacks mandatory field {0}")]
    IncompleteManifest(&'static str),

    #[error("{0} does not seem to be a valid posix rwxrwxrwx permission")]
    InvalidPermissionString(String),

    #[error("control file parse error: {0}")]
    ControlParseError(String),

    #[error("control file lacks a paragraph")]
    ControlFileNoParagraph,

    #[error("control file not found")]
    ControlFileNotFound,

    #[error("required control field missing: {0}")]
    ControlRequiredFieldMissing(&'static str),

    #[error("unknown entry in binary package archive: {0}")]
    DebUnknownBinaryPackageEntry(String),

    #[error("unknown compression in deb archive file: {0}")]
    DebUnknownCompression(String),
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, DebforgeError>;
