//! Decoding file bytes to text with an encoding fallback chain.

use encoding_rs::Encoding;

/// Raised when none of the configured encodings decodes the bytes cleanly.
#[derive(Debug, thiserror::Error)]
#[error("bytes could not be decoded as any of: {tried}")]
pub struct DecodeError {
    pub tried: String,
}

/// Ordered list of encodings tried when decoding file contents.
#[derive(Debug, Clone)]
pub struct EncodingChain {
    encodings: Vec<&'static Encoding>,
}

impl EncodingChain {
    /// Resolve `encoding_rs` labels (e.g. "utf-8", "gbk"), skipping unknown
    /// ones and labels whose decoder is already in the chain.
    pub fn from_labels(labels: &[String]) -> Self {
        let mut encodings: Vec<&'static Encoding> = Vec::with_capacity(labels.len());
        for label in labels {
            match Encoding::for_label(label.trim().as_bytes()) {
                Some(encoding) if encodings.contains(&encoding) => {
                    log::debug!("Encoding label '{}' repeats {}", label, encoding.name());
                }
                Some(encoding) => encodings.push(encoding),
                None => log::warn!("Ignoring unknown encoding label '{}'", label),
            }
        }

        Self { encodings }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.encodings.iter().map(|e| e.name()).collect()
    }

    /// Decode `bytes` with the first encoding that produces no malformed
    /// sequences. A byte order mark selects its encoding directly.
    pub fn decode(&self, bytes: &[u8]) -> Result<(String, &'static Encoding), DecodeError> {
        if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
            if let Some(text) =
                encoding.decode_without_bom_handling_and_without_replacement(&bytes[bom_len..])
            {
                return Ok((text.into_owned(), encoding));
            }
        }

        for encoding in &self.encodings {
            if let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(bytes)
            {
                return Ok((text.into_owned(), encoding));
            }
            log::debug!("Decoding as {} failed, trying next encoding", encoding.name());
        }

        Err(DecodeError {
            tried: self.names().join(", "),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(labels: &[&str]) -> EncodingChain {
        EncodingChain::from_labels(&labels.iter().map(|l| l.to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn test_utf8_wins_first() {
        let (text, encoding) = chain(&["utf-8", "gbk"]).decode("héllo".as_bytes()).unwrap();
        assert_eq!(text, "héllo");
        assert_eq!(encoding, encoding_rs::UTF_8);
    }

    #[test]
    fn test_falls_back_to_gbk() {
        let (bytes, _, had_errors) = encoding_rs::GBK.encode("人工智能");
        assert!(!had_errors);

        let (text, encoding) = chain(&["utf-8", "gbk", "windows-1252"]).decode(&bytes).unwrap();
        assert_eq!(text, "人工智能");
        assert_eq!(encoding, encoding_rs::GBK);
    }

    #[test]
    fn test_single_byte_fallback() {
        // 0xFF alone is invalid in both UTF-8 and GBK
        let bytes = [b'c', b'a', b'f', 0xE9, 0xFF];
        let (text, encoding) = chain(&["utf-8", "gbk", "windows-1252"]).decode(&bytes).unwrap();
        assert_eq!(encoding, encoding_rs::WINDOWS_1252);
        assert!(text.starts_with("caf"));
    }

    #[test]
    fn test_no_encoding_succeeds() {
        let result = chain(&["utf-8"]).decode(&[0xFE, 0xFD]);
        let err = result.unwrap_err();
        assert!(err.tried.contains("UTF-8"));
    }

    #[test]
    fn test_bom_selects_encoding() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice("text".as_bytes());
        let (text, _) = chain(&["windows-1252"]).decode(&bytes).unwrap();
        assert_eq!(text, "text");
    }

    #[test]
    fn test_unknown_labels_skipped() {
        assert_eq!(chain(&["utf-8", "nope"]).names(), vec!["UTF-8"]);
    }

    #[test]
    fn test_repeated_encodings_collapse() {
        assert_eq!(
            chain(&["utf-8", "UTF8", "gbk", "x-gbk", "latin1"]).names(),
            vec!["UTF-8", "GBK", "windows-1252"]
        );
    }
}
