//! Binary encoding for a single embedding vector.
//!
//! Blob format (little-endian):
//! - version: u8 (1)
//! - dimensions: u32
//! - values: [f32; dimensions]
//! - checksum: u32 (CRC32 of every preceding byte)

/// Current blob format version
const FORMAT_VERSION: u8 = 1;

/// version(1) + dimensions(4)
const HEADER_SIZE: usize = 5;

const CHECKSUM_SIZE: usize = 4;

/// Errors that can occur while decoding a vector blob.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Invalid vector blob: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: blob version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Checksum mismatch: blob may be corrupted")]
    ChecksumMismatch,
}

/// Size in bytes of an encoded vector with `dimensions` components.
pub fn encoded_len(dimensions: usize) -> usize {
    HEADER_SIZE + dimensions * 4 + CHECKSUM_SIZE
}

pub fn encode(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(encoded_len(vector.len()));

    bytes.push(FORMAT_VERSION);
    bytes.extend_from_slice(&(vector.len() as u32).to_le_bytes());
    for &value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }

    let checksum = crc32fast::hash(&bytes);
    bytes.extend_from_slice(&checksum.to_le_bytes());
    bytes
}

pub fn decode(bytes: &[u8]) -> Result<Vec<f32>, CodecError> {
    if bytes.len() < HEADER_SIZE + CHECKSUM_SIZE {
        return Err(CodecError::InvalidFormat(format!(
            "blob too short ({} bytes)",
            bytes.len()
        )));
    }

    // Version check first
    let version = bytes[0];
    if version != FORMAT_VERSION {
        return Err(CodecError::VersionMismatch(version, FORMAT_VERSION));
    }

    let dimensions = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
    if bytes.len() != encoded_len(dimensions) {
        return Err(CodecError::InvalidFormat(format!(
            "expected {} bytes for {} dimensions, got {}",
            encoded_len(dimensions),
            dimensions,
            bytes.len()
        )));
    }

    let (body, checksum_bytes) = bytes.split_at(bytes.len() - CHECKSUM_SIZE);
    let stored_checksum = u32::from_le_bytes([
        checksum_bytes[0],
        checksum_bytes[1],
        checksum_bytes[2],
        checksum_bytes[3],
    ]);
    if crc32fast::hash(body) != stored_checksum {
        return Err(CodecError::ChecksumMismatch);
    }

    Ok(body[HEADER_SIZE..]
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let vector = vec![0.25, -1.5, 3.0e-7, f32::MAX, 0.0];
        let decoded = decode(&encode(&vector)).unwrap();
        assert_eq!(decoded.len(), vector.len());
        for (a, b) in vector.iter().zip(decoded.iter()) {
            assert!((a - b).abs() <= 1e-6);
        }
    }

    #[test]
    fn test_layout() {
        let bytes = encode(&[1.0, 2.0]);
        assert_eq!(bytes.len(), encoded_len(2));
        assert_eq!(bytes[0], FORMAT_VERSION);
        assert_eq!(&bytes[1..5], &2u32.to_le_bytes());
        assert_eq!(&bytes[5..9], &1.0f32.to_le_bytes());
    }

    #[test]
    fn test_empty_vector() {
        assert!(decode(&encode(&[])).unwrap().is_empty());
    }

    #[test]
    fn test_version_mismatch() {
        let mut bytes = encode(&[1.0]);
        bytes[0] = 9;
        assert!(matches!(decode(&bytes), Err(CodecError::VersionMismatch(9, 1))));
    }

    #[test]
    fn test_truncated_blob() {
        let bytes = encode(&[1.0, 2.0, 3.0]);
        assert!(matches!(
            decode(&bytes[..bytes.len() - 1]),
            Err(CodecError::InvalidFormat(_))
        ));
        assert!(matches!(decode(&bytes[..3]), Err(CodecError::InvalidFormat(_))));
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let mut bytes = encode(&[1.0, 0.0, 0.0]);
        bytes[6] ^= 0xFF;
        assert!(matches!(decode(&bytes), Err(CodecError::ChecksumMismatch)));
    }
}
