//! Token counting for budget decisions.
//!
//! Uses the cl100k BPE as a model-family-agnostic tokenizer. If the tokenizer
//! cannot be constructed, counting degrades to the `len / 4` estimate and the
//! degradation is logged once.

use once_cell::sync::Lazy;
use tiktoken_rs::CoreBPE;
use tracing::warn;

/// Approximate chars-per-token ratio used by the fallback estimate and by
/// char-domain budget arithmetic in the splitter.
pub const CHARS_PER_TOKEN: usize = 4;

static BPE: Lazy<Option<CoreBPE>> = Lazy::new(|| match tiktoken_rs::cl100k_base() {
    Ok(bpe) => Some(bpe),
    Err(e) => {
        warn!(error = %e, "tokenizer unavailable, falling back to len/4 estimate");
        None
    }
});

/// Count tokens in `text`, falling back to `len / 4` when no tokenizer is
/// available.
pub fn count_tokens(text: &str) -> usize {
    match BPE.as_ref() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => estimate_tokens(text),
    }
}

/// The degraded estimate: one token per four characters, minimum one for
/// non-empty text.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    (text.len() / CHARS_PER_TOKEN).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(count_tokens(""), 0);
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_estimate_minimum_one() {
        assert_eq!(estimate_tokens("ab"), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
    }

    #[test]
    fn test_count_grows_with_text() {
        let short = count_tokens("one sentence.");
        let long = count_tokens(&"one sentence. ".repeat(50));
        assert!(long > short);
    }
}
