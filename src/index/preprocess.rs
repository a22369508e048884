//! Chunk filtering ahead of embedding.
//!
//! Near-empty fragments (navigation crumbs, stray punctuation) produce noisy
//! embeddings, so chunks shorter than a minimum trimmed length are dropped.

/// Minimum trimmed length, in characters, of an indexable chunk.
pub const DEFAULT_MIN_CHUNK_CHARS: usize = 10;

/// Whether `chunk` is long enough to be indexed.
///
/// Length is counted in characters after trimming surrounding whitespace.
pub fn is_indexable(chunk: &str, min_chars: usize) -> bool {
    chunk.trim().chars().count() >= min_chars
}

/// Select the indexable chunks, keeping input order.
///
/// The returned text is the chunk as given, not trimmed.
pub fn indexable_chunks<S: AsRef<str>>(chunks: &[S], min_chars: usize) -> Vec<&str> {
    chunks
        .iter()
        .map(AsRef::as_ref)
        .filter(|chunk| is_indexable(chunk, min_chars))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_chunks_dropped() {
        let chunks = vec!["hi", "a valid long sentence"];
        let kept = indexable_chunks(&chunks, DEFAULT_MIN_CHUNK_CHARS);
        assert_eq!(kept, vec!["a valid long sentence"]);
    }

    #[test]
    fn test_whitespace_does_not_count() {
        assert!(!is_indexable("    short    ", 10));
        assert!(!is_indexable("\n\t\r\n", 1));
        assert!(is_indexable("  exactly10!  ", 10));
    }

    #[test]
    fn test_counts_characters_not_bytes() {
        // 5 characters, 15 bytes
        let text = "日本語です";
        assert!(is_indexable(text, 5));
        assert!(!is_indexable(text, 6));
    }

    #[test]
    fn test_keeps_order_and_original_text() {
        let chunks = vec![
            " second passage here ".to_string(),
            "tiny".to_string(),
            "first passage again".to_string(),
        ];
        let kept = indexable_chunks(&chunks, 10);
        assert_eq!(kept, vec![" second passage here ", "first passage again"]);
    }
}
