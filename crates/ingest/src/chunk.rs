use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::section::Section;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub doc_id: String,
    pub chunk_id: String,
    pub index: usize,
    pub text: String,
    pub section: Section,
    /// Byte length of the leading slice of `text` repeated from the previous chunk.
    pub overlap: usize,
    /// Whitespace that preceded this chunk in the normalised source when it
    /// carries no overlap.
    #[serde(default)]
    pub separator: String,
}

impl Chunk {
    pub fn new(doc_id: &str, index: usize, text: String, section: Section, overlap: usize) -> Self {
        let chunk_id = Self::generate_chunk_id(doc_id, index, &text);

        Self {
            doc_id: doc_id.to_string(),
            chunk_id,
            index,
            text,
            section,
            overlap,
            separator: String::new(),
        }
    }

    pub fn with_separator(mut self, separator: &str) -> Self {
        self.separator = separator.to_string();
        self
    }

    fn generate_chunk_id(doc_id: &str, index: usize, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(doc_id.as_bytes());
        hasher.update(index.to_string().as_bytes());
        hasher.update(text.as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..16])
    }

    /// Text contributed by this chunk alone, i.e. without the repeated overlap.
    pub fn fresh_text(&self) -> &str {
        self.text.get(self.overlap..).unwrap_or("")
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Rebuild the source text from an ordered chunk sequence by dropping each
/// overlap. Chunks cut without overlap put back the separator they recorded.
pub fn reassemble(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    for chunk in chunks {
        if chunk.overlap == 0 {
            out.push_str(&chunk.separator);
        }
        out.push_str(chunk.fresh_text());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_ids_are_stable() {
        let a = Chunk::new("paper-1", 0, "text".to_string(), Section::Abstract, 0);
        let b = Chunk::new("paper-1", 0, "text".to_string(), Section::Abstract, 0);
        let c = Chunk::new("paper-1", 1, "text".to_string(), Section::Abstract, 0);

        assert_eq!(a.chunk_id, b.chunk_id);
        assert_ne!(a.chunk_id, c.chunk_id);
        assert_eq!(a.chunk_id.len(), 32);
    }

    #[test]
    fn fresh_text_skips_overlap() {
        let chunk = Chunk::new("d", 1, "tail\n\nnext part".to_string(), Section::Methods, 4);
        assert_eq!(chunk.fresh_text(), "\n\nnext part");
    }

    #[test]
    fn reassembly_restores_recorded_separators() {
        let chunks = vec![
            Chunk::new("d", 0, "first half".to_string(), Section::Abstract, 0),
            Chunk::new("d", 1, "of a sentence".to_string(), Section::Abstract, 0).with_separator(" "),
            Chunk::new("d", 2, "New paragraph".to_string(), Section::Methods, 0).with_separator("\n\n"),
        ];
        assert_eq!(reassemble(&chunks), "first half of a sentence\n\nNew paragraph");
    }
}
