//! Charset codec and corpus sampling.
//!
//! [`CharsetCodec`] owns the training corpus and the bidirectional
//! character/index mapping derived from it. Index 0 is reserved as the
//! sentinel (start-of-sequence on the input side, end-of-sequence on the
//! output side); real characters occupy indices `1..=charset_len()` in
//! first-seen corpus order. The network sizes its input and output
//! layers as `charset_len() + 1`.
//!
//! ## Example
//!
//! ```rust
//! use starling::codec::CharsetCodec;
//!
//! let corpus = vec!["ab".to_string(), "ba".to_string()];
//! let codec = CharsetCodec::from_corpus(&corpus).unwrap();
//!
//! assert_eq!(codec.charset(), &['a', 'b']);
//! assert_eq!(codec.char_to_index('a').unwrap(), 1);
//! assert_eq!(codec.index_to_char(2), Some('b'));
//! assert_eq!(codec.max_length(), 2);
//! ```

use crate::error::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Corpus-derived character/index codec.
///
/// The codec is immutable after construction; training draws examples
/// from it and the network persists it alongside the model so that a
/// restored network maps indices to the same characters.
#[derive(Clone, Debug)]
pub struct CharsetCodec {
    corpus: Vec<String>,
    charset: Vec<char>,
    index: HashMap<char, usize>,
    max_length: usize,
}

/// Serializable form of a [`CharsetCodec`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CodecRecord {
    pub corpus: Vec<String>,
    pub charset: Vec<char>,
    pub max_length: usize,
}

impl CharsetCodec {
    /// Build a codec from a training corpus.
    ///
    /// The charset is the set of distinct characters across all examples
    /// in first-seen order; `max_length` is the character count of the
    /// longest example.
    ///
    /// # Errors
    ///
    /// `Error::Configuration` if the corpus is empty.
    pub fn from_corpus(corpus: &[String]) -> Result<Self> {
        if corpus.is_empty() {
            return Err(Error::Configuration("corpus is empty".to_string()));
        }

        let mut charset = Vec::new();
        let mut index = HashMap::new();
        let mut max_length = 0;

        for example in corpus {
            max_length = max_length.max(example.chars().count());
            for c in example.chars() {
                if !index.contains_key(&c) {
                    charset.push(c);
                    // index 0 is the sentinel, characters start at 1
                    index.insert(c, charset.len());
                }
            }
        }

        Ok(Self {
            corpus: corpus.to_vec(),
            charset,
            index,
            max_length,
        })
    }

    /// Ordered charset (does not include the sentinel).
    pub fn charset(&self) -> &[char] {
        &self.charset
    }

    /// Number of distinct characters in the charset.
    pub fn charset_len(&self) -> usize {
        self.charset.len()
    }

    /// Character count of the longest corpus example.
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Map a character to its index in `1..=charset_len()`.
    ///
    /// # Errors
    ///
    /// `Error::Codec` if the character is not in the charset.
    pub fn char_to_index(&self, c: char) -> Result<usize> {
        self.index.get(&c).copied().ok_or(Error::Codec(c))
    }

    /// Map an index in `1..=charset_len()` back to its character.
    ///
    /// Returns `None` for the sentinel (0) and for out-of-range indices.
    pub fn index_to_char(&self, ix: usize) -> Option<char> {
        if ix == 0 {
            return None;
        }
        self.charset.get(ix - 1).copied()
    }

    /// Draw one example uniformly at random from the corpus.
    pub fn random_example(&self, rng: &mut impl Rng) -> &str {
        &self.corpus[rng.random_range(0..self.corpus.len())]
    }

    /// Export the codec for persistence.
    pub fn export(&self) -> CodecRecord {
        CodecRecord {
            corpus: self.corpus.clone(),
            charset: self.charset.clone(),
            max_length: self.max_length,
        }
    }

    /// Rebuild a codec from a persisted record.
    ///
    /// The charset order is taken from the record verbatim, since it
    /// fixes the index assignment the persisted model was trained with.
    ///
    /// # Errors
    ///
    /// `Error::Serialization` if the record is empty, contains duplicate
    /// charset entries, or contains corpus characters outside its own
    /// charset.
    pub fn import(record: CodecRecord) -> Result<Self> {
        if record.corpus.is_empty() {
            return Err(Error::Serialization("codec record has empty corpus".to_string()));
        }

        let mut index = HashMap::new();
        for (i, &c) in record.charset.iter().enumerate() {
            if index.insert(c, i + 1).is_some() {
                return Err(Error::Serialization(format!(
                    "duplicate charset entry {c:?} in codec record"
                )));
            }
        }

        for example in &record.corpus {
            for c in example.chars() {
                if !index.contains_key(&c) {
                    return Err(Error::Serialization(format!(
                        "corpus character {c:?} missing from persisted charset"
                    )));
                }
            }
        }

        Ok(Self {
            corpus: record.corpus,
            charset: record.charset,
            index,
            max_length: record.max_length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn corpus(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn charset_uses_first_seen_order_from_index_one() {
        let codec = CharsetCodec::from_corpus(&corpus(&["ba", "ab", "c"])).unwrap();
        assert_eq!(codec.charset(), &['b', 'a', 'c']);
        assert_eq!(codec.char_to_index('b').unwrap(), 1);
        assert_eq!(codec.char_to_index('a').unwrap(), 2);
        assert_eq!(codec.char_to_index('c').unwrap(), 3);
    }

    #[test]
    fn index_zero_is_reserved() {
        let codec = CharsetCodec::from_corpus(&corpus(&["ab"])).unwrap();
        assert_eq!(codec.index_to_char(0), None);
        assert_eq!(codec.index_to_char(1), Some('a'));
        assert_eq!(codec.index_to_char(3), None);
    }

    #[test]
    fn unknown_character_is_rejected() {
        let codec = CharsetCodec::from_corpus(&corpus(&["ab"])).unwrap();
        assert!(matches!(codec.char_to_index('z'), Err(Error::Codec('z'))));
    }

    #[test]
    fn empty_corpus_is_rejected() {
        assert!(matches!(
            CharsetCodec::from_corpus(&[]),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn max_length_counts_chars_not_bytes() {
        let codec = CharsetCodec::from_corpus(&corpus(&["héllo", "hi"])).unwrap();
        assert_eq!(codec.max_length(), 5);
    }

    #[test]
    fn random_example_draws_from_corpus() {
        let codec = CharsetCodec::from_corpus(&corpus(&["ab", "ba"])).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            let ex = codec.random_example(&mut rng);
            assert!(ex == "ab" || ex == "ba");
        }
    }

    #[test]
    fn export_import_roundtrip() {
        let codec = CharsetCodec::from_corpus(&corpus(&["ab", "ba"])).unwrap();
        let restored = CharsetCodec::import(codec.export()).unwrap();
        assert_eq!(restored.charset(), codec.charset());
        assert_eq!(restored.max_length(), codec.max_length());
        assert_eq!(restored.char_to_index('b').unwrap(), 2);
    }

    #[test]
    fn import_rejects_duplicate_charset() {
        let record = CodecRecord {
            corpus: vec!["a".to_string()],
            charset: vec!['a', 'a'],
            max_length: 1,
        };
        assert!(matches!(
            CharsetCodec::import(record),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn import_rejects_uncovered_corpus() {
        let record = CodecRecord {
            corpus: vec!["ab".to_string()],
            charset: vec!['a'],
            max_length: 2,
        };
        assert!(matches!(
            CharsetCodec::import(record),
            Err(Error::Serialization(_))
        ));
    }
}
