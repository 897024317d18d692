//! Overlap-aware text chunking.
//!
//! A window of `max_chunk_size` characters advances through the text. When the
//! window stops short of the end, it is cut after the last sentence terminator
//! or line break, provided that boundary lies past the window's midpoint.
//! Consecutive windows share `overlap` characters.

use std::ops::Range;

/// Errors for invalid chunking parameters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkError {
    #[error("chunk size must be greater than 0")]
    ZeroChunkSize,

    #[error("overlap {overlap} must be smaller than chunk size {chunk_size}")]
    OverlapTooLarge { chunk_size: usize, overlap: usize },
}

/// Reject parameter combinations that cannot make forward progress.
pub fn validate_params(max_chunk_size: usize, overlap: usize) -> Result<(), ChunkError> {
    if max_chunk_size == 0 {
        return Err(ChunkError::ZeroChunkSize);
    }
    if overlap >= max_chunk_size {
        return Err(ChunkError::OverlapTooLarge {
            chunk_size: max_chunk_size,
            overlap,
        });
    }
    Ok(())
}

fn is_boundary(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '\n' | '。' | '！' | '？')
}

/// Character ranges of every window, in text order, before trimming.
///
/// Each range is at most `max_chunk_size` long and starts at or before the end
/// of the previous one.
pub fn split_spans(
    text: &str,
    max_chunk_size: usize,
    overlap: usize,
) -> Result<Vec<Range<usize>>, ChunkError> {
    validate_params(max_chunk_size, overlap)?;

    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let mut spans = Vec::new();
    let mut start = 0;

    while start < len {
        let mut end = (start + max_chunk_size).min(len);

        if end < len {
            if let Some(pos) = chars[start..end].iter().rposition(|c| is_boundary(*c)) {
                if pos > max_chunk_size / 2 {
                    end = start + pos + 1;
                }
            }
        }

        spans.push(start..end);

        if end >= len {
            break;
        }

        // a boundary cut can leave less than `overlap` characters of progress
        let next = end.saturating_sub(overlap);
        start = if next > start { next } else { end };
    }

    Ok(spans)
}

/// Split `text` into trimmed, non-empty chunks.
pub fn split(text: &str, max_chunk_size: usize, overlap: usize) -> Result<Vec<String>, ChunkError> {
    let spans = split_spans(text, max_chunk_size, overlap)?;
    let chars: Vec<char> = text.chars().collect();

    Ok(spans
        .into_iter()
        .map(|span| chars[span].iter().collect::<String>())
        .map(|chunk| chunk.trim().to_string())
        .filter(|chunk| !chunk.is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn char_len(s: &str) -> usize {
        s.chars().count()
    }

    #[test]
    fn test_sentence_boundary_preferred() {
        let chunks = split("The quick brown fox. The fox runs.", 20, 5).unwrap();

        assert!(chunks.len() >= 2);
        assert!(chunks.iter().all(|c| char_len(c) <= 20));
        assert_eq!(chunks[0], "The quick brown fox.");
        assert_eq!(chunks[1], "fox. The fox runs.");
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = split("  hello world  ", 100, 10).unwrap();
        assert_eq!(chunks, vec!["hello world".to_string()]);
    }

    #[test]
    fn test_blank_text_yields_nothing() {
        assert!(split("", 10, 2).unwrap().is_empty());
        assert!(split(" \n\t ", 10, 2).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_params_rejected() {
        assert_eq!(split("abc", 0, 0), Err(ChunkError::ZeroChunkSize));
        assert!(matches!(
            split("abc", 10, 10),
            Err(ChunkError::OverlapTooLarge { .. })
        ));
        assert!(matches!(
            split("abc", 10, 25),
            Err(ChunkError::OverlapTooLarge { .. })
        ));
    }

    #[test]
    fn test_raw_truncation_without_boundary() {
        let text = "a".repeat(25);
        let spans = split_spans(&text, 10, 3).unwrap();
        assert_eq!(spans, vec![0..10, 7..17, 14..24, 21..25]);
    }

    #[test]
    fn test_boundary_before_midpoint_is_ignored() {
        // '.' at index 2 is not past the midpoint of a 10-char window
        let spans = split_spans("ab.defghijklmnop", 10, 2).unwrap();
        assert_eq!(spans[0], 0..10);
    }

    #[test]
    fn test_line_break_and_cjk_boundaries() {
        let spans = split_spans("abcdefg\nhijklmnop", 10, 2).unwrap();
        assert_eq!(spans[0], 0..8);

        let text = "人工智能技术正在快速发展。深度学习不断突破";
        let chunks = split(text, 15, 3).unwrap();
        assert_eq!(chunks[0], "人工智能技术正在快速发展。");
    }

    #[test]
    fn test_progress_when_cut_is_shorter_than_overlap() {
        let text = format!("{}. {}", "a".repeat(11), "b".repeat(40));
        let spans = split_spans(&text, 20, 15).unwrap();

        assert_eq!(spans[0], 0..12);
        assert_eq!(spans[1].start, 12);
        for pair in spans.windows(2) {
            assert!(pair[1].start > pair[0].start);
        }
    }

    #[test]
    fn test_chunking_invariants() {
        let corpus = [
            "Lorem ipsum dolor sit amet. Consectetur adipiscing elit!\nSed do eiusmod? Tempor.",
            "no boundaries at all just a long run of words without any terminators in sight",
            "Short.\n\n\nLines.\nEverywhere.\nAnd more. And more. And more. And more.",
            "Ünïcödé téxt wïth äccents. Ånd sömé möré. Ëvën möré ïn thïs öné.",
        ];

        for text in corpus {
            let len = char_len(text);
            for size in [5usize, 8, 13, 20, 50, 200] {
                for overlap in [0usize, 1, 3, size / 2, size - 1] {
                    let spans = split_spans(text, size, overlap).unwrap();

                    assert_eq!(spans.first().map(|s| s.start), Some(0));
                    assert_eq!(spans.last().map(|s| s.end), Some(len));
                    for span in &spans {
                        assert!(span.end - span.start <= size);
                        assert!(span.end > span.start);
                    }
                    for pair in spans.windows(2) {
                        // no gaps between consecutive windows
                        assert!(pair[1].start <= pair[0].end);
                        assert!(pair[1].start > pair[0].start);
                    }

                    let chunks = split(text, size, overlap).unwrap();
                    assert!(!chunks.is_empty());
                    for chunk in &chunks {
                        assert!(char_len(chunk) <= size);
                        assert!(!chunk.trim().is_empty());
                    }
                }
            }
        }
    }
}
