// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! OpenPGP signing of build artifacts.

[Signer] wraps a secret key selected out of a keyring and produces the two
signature forms the packaging pipeline needs: ASCII armored detached
signatures over binary documents, and RFC 4880 section 7 cleartext
signatures wrapping changes manifests.

Signatures use the SHA-1 digest for interoperability with the legacy
changes file convention consumed by existing tooling. SHA-1 is weak by
modern standards; upgrading it changes on-wire compatibility, so callers
who do not need the legacy convention should not be using these routines.

Core logic never leaks `pgp` crate types: a [Signer] is constructed from
keyring bytes plus a key id and passphrase, and produces strings.
*/

use {
    crate::error::{DebforgeError, Result},
    chrono::SubsecRound,
    pgp::{
        crypto::HashAlgorithm,
        packet::{Packet, SignatureConfig, SignatureType, Subpacket},
        types::{KeyTrait, KeyVersion, SecretKeyTrait},
        Deserializable, SignedSecretKey,
    },
    smallvec::SmallVec,
    std::io::{Cursor, Read},
};

const CLEARSIGN_HEADER: &str = "-----BEGIN PGP SIGNED MESSAGE-----";

/// Signs byte streams with a secret key unlocked from a keyring.
///
/// Keyring material is read once at construction and not retained beyond
/// the signer's lifetime.
pub struct Signer {
    key: SignedSecretKey,
    passphrase: String,
}

impl Signer {
    /// Construct a signer from keyring bytes.
    ///
    /// The keyring may be ASCII armored or binary. `key_id` selects the
    /// secret key whose hex key id ends with it (case insensitive, `0x`
    /// prefix tolerated). The passphrase is validated by unlocking the key
    /// once, so failures surface before anything is signed.
    pub fn from_keyring_reader(
        mut reader: impl Read,
        key_id: &str,
        passphrase: &str,
    ) -> Result<Self> {
        let mut data = vec![];
        reader.read_to_end(&mut data)?;

        let keys = if data.starts_with(b"-----BEGIN") {
            let (keys, _headers) = SignedSecretKey::from_armor_many(Cursor::new(&data))
                .map_err(|e| DebforgeError::UnreadableKeyring(format!("{:?}", e)))?;

            keys.collect::<pgp::errors::Result<Vec<_>>>()
                .map_err(|e| DebforgeError::UnreadableKeyring(format!("{:?}", e)))?
        } else {
            SignedSecretKey::from_bytes_many(Cursor::new(&data))
                .collect::<pgp::errors::Result<Vec<_>>>()
                .map_err(|e| DebforgeError::UnreadableKeyring(format!("{:?}", e)))?
        };

        let wanted = key_id.trim_start_matches("0x").to_lowercase();

        let key = keys
            .into_iter()
            .find(|key| key_id_hex(key).ends_with(&wanted))
            .ok_or_else(|| DebforgeError::KeyNotFound(key_id.to_string()))?;

        Self::from_key(key, passphrase)
    }

    /// Construct a signer from an already parsed secret key.
    pub fn from_key(key: SignedSecretKey, passphrase: &str) -> Result<Self> {
        let passphrase = passphrase.to_string();

        {
            let passphrase = passphrase.clone();
            key.unlock(move || passphrase, |_| Ok(()))
                .map_err(|_| DebforgeError::BadPassphrase(key_id_hex(&key)))?;
        }

        Ok(Self { key, passphrase })
    }

    /// The hex key id of the signing key.
    pub fn key_id_hex(&self) -> String {
        key_id_hex(&self.key)
    }

    /// Produce an ASCII armored detached signature over a binary document.
    pub fn sign_detached(&self, reader: impl Read) -> Result<String> {
        let config = self.signature_config(SignatureType::Binary);
        let passphrase = self.passphrase.clone();

        let signature = config.sign(&self.key, move || passphrase, reader)?;

        armor_signature(signature)
    }

    /// Produce a cleartext signature over text.
    ///
    /// The returned value is a multiline string with LF line endings holding
    /// the dash-escaped cleartext followed by the signature armor. The
    /// digest input is normalized to CRLF line endings with trailing
    /// whitespace removed, per RFC 4880 section 7.1.
    pub fn clearsign(&self, text: &str) -> Result<String> {
        let mut dashed_lines = vec![];
        let mut source_lines = vec![];

        for line in text.lines() {
            // Dash-escaped cleartext is the ordinary cleartext where every
            // line starting with a dash is prefixed by `- `. Trailing
            // whitespace is removed when the signature is generated.
            dashed_lines.push(if line.starts_with('-') || line.starts_with("From ") {
                format!("- {}", line.trim_end())
            } else {
                line.trim_end().to_string()
            });

            source_lines.push(line.trim_end().to_string());
        }

        let cleartext = source_lines.join("\r\n").into_bytes();

        let config = self.signature_config(SignatureType::Text);
        let passphrase = self.passphrase.clone();

        let signature = config.sign(&self.key, move || passphrase, Cursor::new(cleartext))?;
        let signature_string = armor_signature(signature)?;

        let lines = vec![
            CLEARSIGN_HEADER.to_string(),
            "Hash: SHA1".to_string(),
            "".to_string(),
        ]
        .into_iter()
        .chain(dashed_lines)
        .chain(std::iter::once(signature_string))
        .collect::<Vec<_>>();

        Ok(lines.join("\n"))
    }

    fn signature_config(&self, typ: SignatureType) -> SignatureConfig {
        let hashed_subpackets = vec![
            Subpacket::IssuerFingerprint(
                KeyVersion::V4,
                SmallVec::from_slice(&self.key.fingerprint()),
            ),
            Subpacket::SignatureCreationTime(chrono::Utc::now().trunc_subsecs(0)),
        ];
        let unhashed_subpackets = vec![Subpacket::Issuer(self.key.key_id())];

        SignatureConfig::new_v4(
            Default::default(),
            typ,
            self.key.algorithm(),
            HashAlgorithm::SHA1,
            hashed_subpackets,
            unhashed_subpackets,
        )
    }
}

/// Hex encode a key's 64 bit key id (the tail of its fingerprint).
fn key_id_hex(key: &impl KeyTrait) -> String {
    let fingerprint = key.fingerprint();

    hex::encode(&fingerprint[fingerprint.len().saturating_sub(8)..])
}

fn armor_signature(signature: pgp::Signature) -> Result<String> {
    let packet = Packet::Signature(signature);

    let mut writer = Cursor::new(Vec::<u8>::new());
    pgp::armor::write(&packet, pgp::armor::BlockType::Signature, &mut writer, None)?;

    // The armoring should always produce valid UTF-8. But we are careful.
    String::from_utf8(writer.into_inner())
        .map_err(|e| pgp::errors::Error::Utf8Error(e.utf8_error()).into())
}

#[cfg(test)]
pub(crate) mod testutil {
    use {
        pgp::{
            crypto::{HashAlgorithm, SymmetricKeyAlgorithm},
            types::CompressionAlgorithm,
            KeyType, SecretKeyParamsBuilder, SignedSecretKey,
        },
        smallvec::smallvec,
    };

    /// Generate a throwaway RSA signing key for tests.
    pub(crate) fn signing_key() -> SignedSecretKey {
        let mut key_params = SecretKeyParamsBuilder::default();
        key_params
            .key_type(KeyType::Rsa(2048))
            .preferred_symmetric_algorithms(smallvec![SymmetricKeyAlgorithm::AES256])
            .preferred_hash_algorithms(smallvec![HashAlgorithm::SHA2_256])
            .preferred_compression_algorithms(smallvec![CompressionAlgorithm::ZLIB])
            .can_create_certificates(false)
            .can_sign(true)
            .primary_user_id("Test <test@example.com>".to_string());

        let secret_key = key_params.build().unwrap().generate().unwrap();

        secret_key.sign(String::new).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use {super::testutil::signing_key as test_key, super::*};

    #[test]
    fn keyring_lookup() -> Result<()> {
        let key = test_key();
        let armored = key.to_armored_string(None)?;
        let key_id = key_id_hex(&key);

        let signer = Signer::from_keyring_reader(armored.as_bytes(), &key_id[8..], "")?;
        assert_eq!(signer.key_id_hex(), key_id);

        // A 17 character id cannot be a suffix of a 16 character key id.
        assert!(matches!(
            Signer::from_keyring_reader(armored.as_bytes(), "0123456789abcdef0", ""),
            Err(DebforgeError::KeyNotFound(_))
        ));

        Ok(())
    }

    #[test]
    fn malformed_keyring_is_unreadable() {
        let garbage = b"not a keyring at all";

        assert!(matches!(
            Signer::from_keyring_reader(&garbage[..], "cafe", ""),
            Err(DebforgeError::UnreadableKeyring(_))
        ));
    }

    #[test]
    fn detached_signature_is_armored() -> Result<()> {
        let signer = Signer::from_key(test_key(), "")?;

        let signature = signer.sign_detached(&b"payload bytes"[..])?;

        assert!(signature.starts_with("-----BEGIN PGP SIGNATURE-----"));
        assert!(signature.contains("-----END PGP SIGNATURE-----"));

        Ok(())
    }

    #[test]
    fn clearsign_wraps_text() -> Result<()> {
        let signer = Signer::from_key(test_key(), "")?;

        let text = "Format: 1.8\nSource: test-package\n-- a dashed line\n";
        let signed = signer.clearsign(text)?;

        assert!(signed.starts_with("-----BEGIN PGP SIGNED MESSAGE-----\nHash: SHA1\n\n"));
        assert!(signed.contains("Format: 1.8\nSource: test-package\n"));
        // Dash escaping applied to the body.
        assert!(signed.contains("\n- -- a dashed line\n"));
        assert!(signed.contains("-----BEGIN PGP SIGNATURE-----"));
        assert!(signed.contains("-----END PGP SIGNATURE-----"));

        Ok(())
    }
}
