use std::path::Path;

use tokenizers::{
    PaddingDirection, PaddingParams, Tokenizer as HfTokenizer, TruncationDirection,
    TruncationParams,
};
use tracing::debug;

use crate::error::{CoreError, CoreResult};

/// Thin wrapper around the Hugging Face `tokenizers` crate.
///
/// Truncation is configured on the left so that whatever survives is the
/// most recent part of the conversation. Padding is also on the left and
/// only affects [`encode_batch`](Self::encode_batch), so batched prompts end
/// at the same position and generation continues at the right edge.
#[derive(Debug)]
pub struct Tokenizer {
    inner: HfTokenizer,
    eos_token_id: Option<u32>,
    bos_token_id: Option<u32>,
    pad_token_id: Option<u32>,
    model_max_length: usize,
}

impl Tokenizer {
    /// Load a tokenizer from a `tokenizer.json` file.
    pub fn from_file(path: &Path, model_max_length: usize) -> CoreResult<Self> {
        let inner = HfTokenizer::from_file(path)
            .map_err(|e| CoreError::Tokenizer(e.to_string()))?;
        debug!(path = %path.display(), "Tokenizer loaded from file");
        Self::from_hf(inner, model_max_length)
    }

    /// Build from the raw bytes of a `tokenizer.json`.
    pub fn from_bytes(bytes: &[u8], model_max_length: usize) -> CoreResult<Self> {
        let inner = HfTokenizer::from_bytes(bytes)
            .map_err(|e| CoreError::Tokenizer(e.to_string()))?;
        Self::from_hf(inner, model_max_length)
    }

    fn from_hf(mut inner: HfTokenizer, model_max_length: usize) -> CoreResult<Self> {
        if model_max_length == 0 {
            return Err(CoreError::Config {
                field: "model_max_length".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        let eos_token_id = Self::special_token_id(&inner, &["</s>", "<|endoftext|>", "<eos>"]);
        let bos_token_id = Self::special_token_id(&inner, &["<s>", "<|startoftext|>", "<bos>"]);
        let pad_token_id =
            Self::special_token_id(&inner, &["<pad>", "[PAD]", "<|pad|>"]).or(eos_token_id);

        inner
            .with_truncation(Some(TruncationParams {
                max_length: model_max_length,
                direction: TruncationDirection::Left,
                ..Default::default()
            }))
            .map_err(|e| CoreError::Tokenizer(e.to_string()))?;

        let mut padding = PaddingParams {
            direction: PaddingDirection::Left,
            ..Default::default()
        };
        if let Some(id) = pad_token_id {
            padding.pad_id = id;
            if let Some(token) = inner.id_to_token(id) {
                padding.pad_token = token;
            }
        }
        inner.with_padding(Some(padding));

        debug!(
            eos_token_id,
            bos_token_id,
            pad_token_id,
            model_max_length,
            vocab_size = inner.get_vocab_size(true),
            "Tokenizer configured"
        );

        Ok(Self { inner, eos_token_id, bos_token_id, pad_token_id, model_max_length })
    }

    /// Encode a text string to a sequence of token ids.
    ///
    /// Sequences longer than the configured window lose their oldest tokens.
    pub fn encode(&self, text: &str, add_special_tokens: bool) -> CoreResult<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, add_special_tokens)
            .map_err(|e| CoreError::Tokenizer(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    /// Encode several texts at once, left-padded to the longest one.
    pub fn encode_batch(&self, texts: &[&str], add_special_tokens: bool) -> CoreResult<Vec<Vec<u32>>> {
        let encodings = self
            .inner
            .encode_batch(texts.to_vec(), add_special_tokens)
            .map_err(|e| CoreError::Tokenizer(e.to_string()))?;
        Ok(encodings.iter().map(|e| e.get_ids().to_vec()).collect())
    }

    /// Decode a sequence of token ids back to a string.
    pub fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> CoreResult<String> {
        self.inner
            .decode(ids, skip_special_tokens)
            .map_err(|e| CoreError::Tokenizer(e.to_string()))
    }

    /// Decode a single token id to its string representation.
    pub fn decode_token(&self, id: u32) -> CoreResult<String> {
        if self.inner.id_to_token(id).is_none() {
            return Err(CoreError::Tokenizer(format!("Unknown token id: {id}")));
        }
        self.decode(&[id], false)
    }

    /// The end-of-sequence token id, if known.
    pub fn eos_token_id(&self) -> Option<u32> {
        self.eos_token_id
    }

    /// The beginning-of-sequence token id, if known.
    pub fn bos_token_id(&self) -> Option<u32> {
        self.bos_token_id
    }

    /// The padding token id; falls back to EOS when the vocabulary has none.
    pub fn pad_token_id(&self) -> Option<u32> {
        self.pad_token_id
    }

    /// Configured maximum context window, in tokens.
    pub fn model_max_length(&self) -> usize {
        self.model_max_length
    }

    /// The size of the model vocabulary.
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    /// Look up the token id for an exact token string (e.g. `"</s>"`).
    pub fn token_id(&self, text: &str) -> Option<u32> {
        self.inner.token_to_id(text)
    }

    fn special_token_id(tokenizer: &HfTokenizer, candidates: &[&str]) -> Option<u32> {
        candidates.iter().find_map(|c| tokenizer.token_to_id(c))
    }
}

/// Keep the last `max_len` ids, dropping the oldest ones first.
pub fn truncate_left(ids: &mut Vec<u32>, max_len: usize) {
    if ids.len() > max_len {
        ids.drain(..ids.len() - max_len);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const STUB_TOKENIZER: &[u8] =
        include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/../../test-data/stub_tokenizer.json"));

    pub(crate) fn stub_tokenizer(model_max_length: usize) -> Tokenizer {
        Tokenizer::from_bytes(STUB_TOKENIZER, model_max_length)
            .expect("test-data/stub_tokenizer.json must parse")
    }

    #[test]
    fn special_tokens_detected() {
        let tok = stub_tokenizer(64);
        assert_eq!(tok.eos_token_id(), Some(2));
        assert_eq!(tok.pad_token_id(), Some(0));
        assert_eq!(tok.bos_token_id(), None);
        assert_eq!(tok.model_max_length(), 64);
    }

    #[test]
    fn encode_known_words() {
        let tok = stub_tokenizer(64);
        let ids = tok.encode("hello world", false).unwrap();
        assert_eq!(ids, vec![tok.token_id("hello").unwrap(), tok.token_id("world").unwrap()]);
    }

    #[test]
    fn window_truncates_from_the_left() {
        let tok = stub_tokenizer(2);
        let ids = tok.encode("the quick brown fox", false).unwrap();
        assert_eq!(ids, vec![tok.token_id("brown").unwrap(), tok.token_id("fox").unwrap()]);
    }

    #[test]
    fn single_encode_is_not_padded() {
        let tok = stub_tokenizer(64);
        assert_eq!(tok.encode("fox", false).unwrap(), vec![tok.token_id("fox").unwrap()]);
    }

    #[test]
    fn batch_is_padded_on_the_left() {
        let tok = stub_tokenizer(64);
        let batch = tok.encode_batch(&["hello world", "fox"], false).unwrap();
        let pad = tok.pad_token_id().unwrap();
        assert_eq!(batch[0], vec![tok.token_id("hello").unwrap(), tok.token_id("world").unwrap()]);
        assert_eq!(batch[1], vec![pad, tok.token_id("fox").unwrap()]);
    }

    #[test]
    fn decode_single_token() {
        let tok = stub_tokenizer(64);
        let id = tok.token_id("fox").unwrap();
        assert_eq!(tok.decode_token(id).unwrap(), "fox");
    }

    #[test]
    fn decode_unknown_id_is_error() {
        let tok = stub_tokenizer(64);
        assert!(matches!(tok.decode_token(9_999), Err(CoreError::Tokenizer(_))));
    }

    #[test]
    fn zero_window_rejected() {
        assert!(matches!(
            Tokenizer::from_bytes(STUB_TOKENIZER, 0),
            Err(CoreError::Config { .. })
        ));
    }

    #[test]
    fn truncate_left_keeps_suffix() {
        let mut ids: Vec<u32> = (0..10).collect();
        truncate_left(&mut ids, 4);
        assert_eq!(ids, vec![6, 7, 8, 9]);

        let mut short = vec![1, 2];
        truncate_left(&mut short, 4);
        assert_eq!(short, vec![1, 2]);
    }
}
