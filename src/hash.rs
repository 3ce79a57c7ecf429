//! Integrity digests over stored payload bytes.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::Digest;
use std::fmt;
use std::str::FromStr;

/// Digest algorithm recorded in each metadata record (`cacheControl`).
///
/// The set is closed: an unknown name is a configuration error, never a
/// silent fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum HashAlgorithm {
    #[default]
    Md5,
    Crc32,
    Sha1,
    Sha512,
    Adler32,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 5] = [
        HashAlgorithm::Md5,
        HashAlgorithm::Crc32,
        HashAlgorithm::Sha1,
        HashAlgorithm::Sha512,
        HashAlgorithm::Adler32,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Crc32 => "crc32",
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha512 => "sha512",
            HashAlgorithm::Adler32 => "adler32",
        }
    }

    /// Lower-case hex digest of `bytes`.
    ///
    /// Checksums (CRC32, Adler-32) are rendered as 8 hex digits, big-endian.
    pub fn digest(&self, bytes: &[u8]) -> String {
        match self {
            HashAlgorithm::Md5 => hex::encode(md5::Md5::digest(bytes)),
            HashAlgorithm::Sha1 => hex::encode(sha1::Sha1::digest(bytes)),
            HashAlgorithm::Sha512 => hex::encode(sha2::Sha512::digest(bytes)),
            HashAlgorithm::Crc32 => format!("{:08x}", crc32fast::hash(bytes)),
            HashAlgorithm::Adler32 => format!("{:08x}", adler::adler32_slice(bytes)),
        }
    }

    /// Check `bytes` against a previously recorded digest.
    pub fn verify(&self, bytes: &[u8], expected: &str) -> bool {
        self.digest(bytes).eq_ignore_ascii_case(expected)
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "md5" => Ok(HashAlgorithm::Md5),
            "crc32" | "crc32b" => Ok(HashAlgorithm::Crc32),
            "sha1" | "sha-1" => Ok(HashAlgorithm::Sha1),
            "sha512" | "sha-512" => Ok(HashAlgorithm::Sha512),
            "adler32" | "adler-32" => Ok(HashAlgorithm::Adler32),
            other => Err(Error::ConfigError(format!(
                "Unsupported hash algorithm: {}",
                other
            ))),
        }
    }
}

impl TryFrom<String> for HashAlgorithm {
    type Error = Error;

    fn try_from(name: String) -> Result<Self> {
        name.parse()
    }
}
