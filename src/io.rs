// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! I/O helpers: content digests and compression codecs. */

use {
    crate::error::{DebforgeError, Result},
    digest::Digest,
    std::{
        fmt::Formatter,
        io::Read,
        path::Path,
        str::FromStr,
    },
};

/// Represents a content digest.
#[derive(Clone, Eq, PartialEq, PartialOrd)]
pub enum ContentDigest {
    /// An MD5 digest.
    Md5(Vec<u8>),
    /// A SHA-1 digest.
    Sha1(Vec<u8>),
    /// A SHA-256 digest.
    Sha256(Vec<u8>),
}

impl std::fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Md5(data) => write!(f, "Md5({})", hex::encode(data)),
            Self::Sha1(data) => write!(f, "Sha1({})", hex::encode(data)),
            Self::Sha256(data) => write!(f, "Sha256({})", hex::encode(data)),
        }
    }
}

impl ContentDigest {
    /// Obtain the digest bytes for this content digest.
    pub fn digest_bytes(&self) -> &[u8] {
        match self {
            Self::Md5(x) => x,
            Self::Sha1(x) => x,
            Self::Sha256(x) => x,
        }
    }

    /// Obtain the hex encoded content digest.
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest_bytes())
    }
}

/// Holds multiple flavors of content digests over the same bytes.
#[derive(Clone, Debug)]
pub struct MultiContentDigest {
    pub md5: ContentDigest,
    pub sha1: ContentDigest,
    pub sha256: ContentDigest,
}

/// A content digester that simultaneously computes multiple digest types.
pub struct MultiDigester {
    md5: md5::Md5,
    sha1: sha1::Sha1,
    sha256: sha2::Sha256,
}

impl Default for MultiDigester {
    fn default() -> Self {
        Self {
            md5: md5::Md5::new(),
            sha1: sha1::Sha1::new(),
            sha256: sha2::Sha256::new(),
        }
    }
}

impl MultiDigester {
    /// Write content into the digesters.
    pub fn update(&mut self, data: &[u8]) {
        self.md5.update(data);
        self.sha1.update(data);
        self.sha256.update(data);
    }

    /// Finish digesting content.
    ///
    /// Consumes the instance and returns a [MultiContentDigest] holding all
    /// the digests.
    pub fn finish(self) -> MultiContentDigest {
        MultiContentDigest {
            md5: ContentDigest::Md5(self.md5.finalize().to_vec()),
            sha1: ContentDigest::Sha1(self.sha1.finalize().to_vec()),
            sha256: ContentDigest::Sha256(self.sha256.finalize().to_vec()),
        }
    }
}

/// A [Read] adapter that computes multiple [ContentDigest] as data is read.
///
/// Digests cover the exact bytes read from the source, before any
/// downstream compression is applied.
pub struct DigestingReader<R> {
    digester: MultiDigester,
    source: R,
    bytes_read: u64,
}

impl<R: Read> DigestingReader<R> {
    /// Construct a new instance from a source reader.
    pub fn new(source: R) -> Self {
        Self {
            digester: MultiDigester::default(),
            source,
            bytes_read: 0,
        }
    }

    /// Number of bytes read from the source so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Finish the stream.
    ///
    /// Returns the source reader, a resolved [MultiContentDigest], and the
    /// total number of bytes read.
    pub fn finish(self) -> (R, MultiContentDigest, u64) {
        (self.source, self.digester.finish(), self.bytes_read)
    }
}

impl<R: Read> Read for DigestingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let size = self.source.read(buf)?;

        if size > 0 {
            self.digester.update(&buf[0..size]);
            self.bytes_read += size as u64;
        }

        Ok(size)
    }
}

/// Compute size and digests over everything a reader yields.
pub fn digest_reader(reader: &mut impl Read) -> Result<(u64, MultiContentDigest)> {
    let mut digesting = DigestingReader::new(reader);
    std::io::copy(&mut digesting, &mut std::io::sink())?;
    let (_, digest, size) = digesting.finish();

    Ok((size, digest))
}

/// Compression format applied to tar members inside `.deb` files.
///
/// `Bzip2` and `Xz` exist for compatibility with archives found in the
/// wild; new packages conventionally use `Gzip`.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Compression {
    /// No compression (no extension).
    None,
    /// Gzip compression (.gz extension).
    Gzip,
    /// Bzip2 compression (.bz2 extension).
    Bzip2,
    /// XZ compression (.xz extension).
    Xz,
}

impl FromStr for Compression {
    type Err = DebforgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "gzip" => Ok(Self::Gzip),
            "bzip2" => Ok(Self::Bzip2),
            "xz" => Ok(Self::Xz),
            _ => Err(DebforgeError::UnsupportedCompression(s.to_string())),
        }
    }
}

impl Compression {
    /// Filename extension for files compressed in this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Gzip => ".gz",
            Self::Bzip2 => ".bz2",
            Self::Xz => ".xz",
        }
    }

    /// Resolve the compression format for a tarball path from its extension.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        match path
            .as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
        {
            "gz" | "tgz" => Self::Gzip,
            "bz2" => Self::Bzip2,
            "xz" => Self::Xz,
            _ => Self::None,
        }
    }

    /// Compress input data from a reader into a byte buffer.
    pub fn compress(&self, reader: &mut impl Read) -> Result<Vec<u8>> {
        let mut buffer = vec![];

        match self {
            Self::None => {
                std::io::copy(reader, &mut buffer)?;
            }
            Self::Gzip => {
                let header = libflate::gzip::HeaderBuilder::new().finish();

                let mut encoder = libflate::gzip::Encoder::with_options(
                    &mut buffer,
                    libflate::gzip::EncodeOptions::new().header(header),
                )?;
                std::io::copy(reader, &mut encoder)?;
                encoder.finish().into_result()?;
            }
            Self::Bzip2 => {
                let mut encoder =
                    bzip2::write::BzEncoder::new(buffer, bzip2::Compression::best());
                std::io::copy(reader, &mut encoder)?;
                buffer = encoder.finish()?;
            }
            Self::Xz => {
                let mut encoder = xz2::write::XzEncoder::new(buffer, 6);
                std::io::copy(reader, &mut encoder)?;
                buffer = encoder.finish()?;
            }
        }

        Ok(buffer)
    }

    /// Wrap a reader with transparent decompression for this format.
    pub fn decompress<'a>(&self, reader: impl Read + 'a) -> Result<Box<dyn Read + 'a>> {
        Ok(match self {
            Self::None => Box::new(reader),
            Self::Gzip => Box::new(libflate::gzip::Decoder::new(reader)?),
            Self::Bzip2 => Box::new(bzip2::read::BzDecoder::new(reader)),
            Self::Xz => Box::new(xz2::read::XzDecoder::new(reader)),
        })
    }
}

/// Obtain a decompressing reader for a `.deb` tar member filename suffix.
///
/// The suffix is what follows `control.tar`/`data.tar` in the member name.
pub fn reader_from_member_suffix<'a>(
    suffix: &str,
    reader: impl Read + 'a,
) -> Result<Box<dyn Read + 'a>> {
    match suffix {
        "" => Compression::None.decompress(reader),
        ".gz" => Compression::Gzip.decompress(reader),
        ".bz2" => Compression::Bzip2.decompress(reader),
        ".xz" => Compression::Xz.decompress(reader),
        _ => Err(DebforgeError::DebUnknownCompression(suffix.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::io::Cursor};

    #[test]
    fn digesting_reader_counts_and_hashes() -> Result<()> {
        let mut reader = DigestingReader::new(Cursor::new(b"hello world".to_vec()));
        std::io::copy(&mut reader, &mut std::io::sink())?;

        let (_, digest, size) = reader.finish();
        assert_eq!(size, 11);
        assert_eq!(digest.md5.digest_hex(), "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert_eq!(
            digest.sha256.digest_hex(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );

        Ok(())
    }

    #[test]
    fn compression_round_trips() -> Result<()> {
        let payload = b"some bytes worth compressing".repeat(64);

        for compression in [
            Compression::None,
            Compression::Gzip,
            Compression::Bzip2,
            Compression::Xz,
        ] {
            let compressed = compression.compress(&mut Cursor::new(payload.clone()))?;

            let mut decoded = vec![];
            compression
                .decompress(Cursor::new(compressed))?
                .read_to_end(&mut decoded)?;

            assert_eq!(decoded, payload, "{:?} round trips", compression);
        }

        Ok(())
    }

    #[test]
    fn compression_from_str() {
        assert_eq!("gzip".parse::<Compression>().unwrap(), Compression::Gzip);
        assert_eq!("none".parse::<Compression>().unwrap(), Compression::None);
        assert!(matches!(
            "zstd".parse::<Compression>(),
            Err(DebforgeError::UnsupportedCompression(_))
        ));
    }

    #[test]
    fn compression_from_path() {
        assert_eq!(Compression::from_path("a/b.tar.gz"), Compression::Gzip);
        assert_eq!(Compression::from_path("a/b.tar.bz2"), Compression::Bzip2);
        assert_eq!(Compression::from_path("a/b.tar.xz"), Compression::Xz);
        assert_eq!(Compression::from_path("a/b.tar"), Compression::None);
    }
}
