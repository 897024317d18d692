//! Content fingerprints used to decide whether a file needs re-indexing.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use sha2::{Digest, Sha256};

use crate::semantic::store::{VectorStore, VectorStoreError};

/// Read buffer size used while hashing files
const READ_BUF_SIZE: usize = 8 * 1024;

/// SHA-256 digest of some content.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid content hash: {0}")]
pub struct ParseHashError(String);

impl FromStr for ContentHash {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 || !s.is_ascii() {
            return Err(ParseHashError(s.to_string()));
        }

        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| ParseHashError(s.to_string()))?;
        }
        Ok(Self(bytes))
    }
}

/// Fingerprint raw bytes.
pub fn fingerprint(bytes: &[u8]) -> ContentHash {
    ContentHash(Sha256::digest(bytes).into())
}

/// Fingerprint decoded text.
pub fn text_fingerprint(text: &str) -> ContentHash {
    fingerprint(text.as_bytes())
}

/// Stream a file through the hasher, returning the digest and the bytes read.
pub fn fingerprint_file(path: &Path) -> io::Result<(ContentHash, Vec<u8>)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut bytes = Vec::with_capacity(file.metadata().map(|m| m.len() as usize).unwrap_or(0));
    let mut buf = [0u8; READ_BUF_SIZE];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        bytes.extend_from_slice(&buf[..n]);
    }

    Ok((ContentHash(hasher.finalize().into()), bytes))
}

/// True when `path` is already stored with exactly `hash`.
///
/// A missing record is never "unchanged".
pub fn unchanged(
    store: &VectorStore,
    path: &str,
    hash: &ContentHash,
) -> Result<bool, VectorStoreError> {
    Ok(store.content_hash(path)?.as_ref() == Some(hash))
}
