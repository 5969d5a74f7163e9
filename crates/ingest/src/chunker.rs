use crate::chunk::Chunk;
use crate::section::detect_section;

const PARAGRAPH_SEPARATOR: &str = "\n\n";
const LINE_SEPARATOR: &str = "\n";
const WORD_SEPARATOR: &str = " ";

#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Target chunk length in characters.
    pub chunk_size: usize,
    /// Characters repeated at the start of each following chunk.
    pub overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 2000,
            overlap: 200,
        }
    }
}

pub struct Chunker {
    config: ChunkerConfig,
}

/// A paragraph or a word-boundary slice of one, with the separator that
/// preceded it in the normalised text.
struct Piece {
    text: String,
    separator: &'static str,
}

/// One chunk's worth of normalised text.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub text: String,
    /// Byte length of the leading slice repeated from the previous segment.
    pub overlap: usize,
    /// Separator that preceded `text` in the normalised source when the
    /// segment carries no overlap; empty otherwise.
    pub separator: &'static str,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        let chunk_size = config.chunk_size.max(1);
        // An overlap as large as the chunk itself would never make progress.
        let overlap = config.overlap.min(chunk_size / 2);
        Self {
            config: ChunkerConfig {
                chunk_size,
                overlap,
            },
        }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Split raw text into overlapping segments and label each with a section.
    pub fn chunk_text(&self, doc_id: &str, text: &str) -> Vec<Chunk> {
        let segments = self.split(text);
        let total = segments.len();

        segments
            .into_iter()
            .enumerate()
            .map(|(index, segment)| {
                let section = detect_section(&segment.text, index, total);
                Chunk::new(doc_id, index, segment.text, section, segment.overlap).with_separator(segment.separator)
            })
            .collect()
    }

    pub fn split(&self, text: &str) -> Vec<Segment> {
        let pieces = self.pieces(text);
        let mut segments: Vec<Segment> = Vec::new();

        let mut buffer = String::new();
        let mut buffer_chars = 0usize;
        let mut buffer_overlap = 0usize;
        let mut buffer_separator = "";
        // True while the buffer holds nothing but the carried-over overlap.
        let mut only_overlap = true;

        for piece in pieces {
            let piece_chars = piece.text.chars().count();
            let sep_chars = if buffer.is_empty() { 0 } else { piece.separator.len() };

            if !only_overlap && buffer_chars + sep_chars + piece_chars > self.config.chunk_size {
                let tail = overlap_tail(&buffer, self.config.overlap).to_string();
                segments.push(Segment {
                    text: std::mem::take(&mut buffer),
                    overlap: buffer_overlap,
                    separator: buffer_separator,
                });

                buffer_overlap = tail.len();
                buffer_chars = tail.chars().count();
                buffer = tail;
                buffer_separator = "";
                only_overlap = true;
            }

            if buffer.is_empty() {
                if !segments.is_empty() {
                    buffer_separator = piece.separator;
                }
            } else {
                buffer.push_str(piece.separator);
                buffer_chars += piece.separator.len();
            }
            buffer.push_str(&piece.text);
            buffer_chars += piece_chars;
            only_overlap = false;
        }

        if !only_overlap {
            segments.push(Segment {
                text: buffer,
                overlap: buffer_overlap,
                separator: buffer_separator,
            });
        }

        segments
    }

    fn pieces(&self, text: &str) -> Vec<Piece> {
        let mut pieces = Vec::new();

        for paragraph in split_paragraphs(text) {
            if paragraph.chars().count() <= self.config.chunk_size {
                pieces.push(Piece {
                    text: paragraph,
                    separator: PARAGRAPH_SEPARATOR,
                });
                continue;
            }

            for (i, (part, separator)) in self.split_long_paragraph(&paragraph).into_iter().enumerate() {
                pieces.push(Piece {
                    text: part,
                    separator: if i == 0 { PARAGRAPH_SEPARATOR } else { separator },
                });
            }
        }

        pieces
    }

    /// Split on word boundaries so every part fits the chunk size. A single
    /// word longer than the chunk size is cut at character boundaries. Each
    /// part comes with the whitespace that preceded it.
    fn split_long_paragraph(&self, paragraph: &str) -> Vec<(String, &'static str)> {
        let limit = self.config.chunk_size;
        let mut parts = Vec::new();
        let mut current = String::new();
        let mut current_chars = 0usize;
        let mut current_separator = "";

        for (separator, word) in words_with_separators(paragraph) {
            let word_chars = word.chars().count();

            if word_chars > limit {
                if !current.is_empty() {
                    parts.push((std::mem::take(&mut current), current_separator));
                    current_chars = 0;
                }
                let chars: Vec<char> = word.chars().collect();
                for (i, slice) in chars.chunks(limit).enumerate() {
                    parts.push((slice.iter().collect(), if i == 0 { separator } else { "" }));
                }
                continue;
            }

            let extra = if current.is_empty() { 0 } else { separator.len() };
            if current_chars + extra + word_chars > limit {
                parts.push((std::mem::take(&mut current), current_separator));
                current_chars = 0;
            }
            if current.is_empty() {
                current_separator = separator;
            } else {
                current.push_str(separator);
                current_chars += separator.len();
            }
            current.push_str(word);
            current_chars += word_chars;
        }

        if !current.is_empty() {
            parts.push((current, current_separator));
        }

        parts
    }
}

// Words of a normalised paragraph with the separator in front of each.
fn words_with_separators(paragraph: &str) -> impl Iterator<Item = (&'static str, &str)> {
    paragraph.split(LINE_SEPARATOR).enumerate().flat_map(|(l, line)| {
        line.split(WORD_SEPARATOR).enumerate().map(move |(w, word)| {
            let separator = match (l, w) {
                (0, 0) => "",
                (_, 0) => LINE_SEPARATOR,
                _ => WORD_SEPARATOR,
            };
            (separator, word)
        })
    })
}

/// Paragraphs separated by blank lines. Whitespace inside a line is
/// collapsed; line breaks inside a paragraph are kept so headings stay on
/// their own line.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<String> = Vec::new();

    for line in text.lines() {
        let line = collapse_whitespace(line);
        if line.is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join(LINE_SEPARATOR));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join(LINE_SEPARATOR));
    }

    paragraphs
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Last `overlap` characters of `text`, nudged forward to start on a word.
fn overlap_tail(text: &str, overlap: usize) -> &str {
    if overlap == 0 {
        return "";
    }
    let total = text.chars().count();
    if total <= overlap {
        return text;
    }

    let start = text
        .char_indices()
        .nth(total - overlap)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let tail = &text[start..];

    let starts_mid_word = text[..start]
        .chars()
        .next_back()
        .is_some_and(|c| !c.is_whitespace());
    if !starts_mid_word {
        return tail.trim_start();
    }

    match tail.find(char::is_whitespace) {
        Some(ws) => tail[ws..].trim_start(),
        None => tail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::reassemble;
    use crate::section::Section;

    fn normalised(text: &str) -> String {
        split_paragraphs(text).join("\n\n")
    }

    fn paper_text() -> String {
        let mut text = String::from("Abstract\nWe present FastSplat, a faster splatting method.\n\n");
        for i in 0..30 {
            text.push_str(&format!(
                "Paragraph {i} discusses Gaussian primitives, tile rasterization and densification \
                 heuristics in enough detail to take up some room.\n\n"
            ));
        }
        text
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let chunker = Chunker::new(ChunkerConfig::default());
        assert!(chunker.chunk_text("doc", "").is_empty());
        assert!(chunker.chunk_text("doc", "  \n\n \n").is_empty());
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunker = Chunker::new(ChunkerConfig::default());
        let chunks = chunker.chunk_text("doc", "This is a test paragraph.\n\nThis is another paragraph.");

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].doc_id, "doc");
        assert_eq!(chunks[0].overlap, 0);
        assert_eq!(chunks[0].section, Section::Abstract);
    }

    #[test]
    fn reassembly_reconstructs_normalised_text() {
        let text = paper_text();
        let chunker = Chunker::new(ChunkerConfig {
            chunk_size: 400,
            overlap: 80,
        });
        let chunks = chunker.chunk_text("doc", &text);

        assert!(chunks.len() > 3);
        assert_eq!(reassemble(&chunks), normalised(&text));
    }

    #[test]
    fn consecutive_chunks_overlap_on_word_boundaries() {
        let text = paper_text();
        let chunker = Chunker::new(ChunkerConfig {
            chunk_size: 400,
            overlap: 80,
        });
        let chunks = chunker.chunk_text("doc", &text);

        for pair in chunks.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            let repeated = &next.text[..next.overlap];
            assert!(!repeated.is_empty());
            assert!(prev.text.ends_with(repeated));
            assert!(repeated.chars().count() <= 80);
            assert!(!repeated.starts_with(' '));
        }
    }

    #[test]
    fn long_paragraphs_split_on_words() {
        let words: Vec<String> = (0..200).map(|i| format!("word{i}")).collect();
        let text = words.join(" ");
        let chunker = Chunker::new(ChunkerConfig {
            chunk_size: 100,
            overlap: 20,
        });
        let chunks = chunker.chunk_text("doc", &text);

        assert!(chunks.len() > 5);
        for chunk in &chunks {
            assert!(chunk.char_len() <= 100 + 20 + 1);
            for token in chunk.text.split_whitespace() {
                assert!(token.starts_with("word"), "split inside a word: {token}");
            }
        }
        assert_eq!(reassemble(&chunks), text);
    }

    #[test]
    fn word_cuts_without_overlap_reassemble_exactly() {
        let words: Vec<String> = (0..120).map(|i| format!("token{i}")).collect();
        let text = format!("Intro line\n\n{}\nsecond line of the same paragraph", words.join(" "));
        let chunker = Chunker::new(ChunkerConfig {
            chunk_size: 90,
            overlap: 0,
        });
        let chunks = chunker.chunk_text("doc", &text);

        assert!(chunks.len() > 5);
        assert!(chunks[1..].iter().any(|c| c.separator == " "));
        assert_eq!(reassemble(&chunks), text);
    }

    #[test]
    fn headings_survive_paragraph_normalisation() {
        let mut text = String::new();
        for i in 0..6 {
            text.push_str(&format!("Filler paragraph {i} pads the paper with neutral words about splats.\n\n"));
        }
        text.push_str("4 Experiments\nWe evaluate FastSplat on Mip-NeRF360 and report PSNR.");

        let chunker = Chunker::new(ChunkerConfig {
            chunk_size: 100,
            overlap: 20,
        });
        let chunks = chunker.chunk_text("doc", &text);
        let last = chunks.last().unwrap();

        assert_eq!(chunks.len(), 7);
        assert!(last.text.contains("4 Experiments\nWe evaluate FastSplat"));
        assert_eq!(last.section, Section::Results);
    }

    #[test]
    fn line_breaks_inside_paragraphs_are_kept() {
        assert_eq!(
            split_paragraphs("3  Method\n  We   render.\n\n\nNext"),
            vec!["3 Method\nWe render.".to_string(), "Next".to_string()]
        );
    }

    #[test]
    fn oversized_words_are_hard_split() {
        let text = "x".repeat(250);
        let chunker = Chunker::new(ChunkerConfig {
            chunk_size: 100,
            overlap: 0,
        });
        let chunks = chunker.chunk_text("doc", &text);

        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.char_len() <= 100));
    }

    #[test]
    fn overlap_is_clamped_below_chunk_size() {
        let chunker = Chunker::new(ChunkerConfig {
            chunk_size: 50,
            overlap: 500,
        });
        assert_eq!(chunker.config().overlap, 25);
    }

    #[test]
    fn multibyte_text_is_sliced_safely() {
        let text = "Différentiable rendu à base de gaussiennes — été ".repeat(40);
        let chunker = Chunker::new(ChunkerConfig {
            chunk_size: 120,
            overlap: 30,
        });
        let chunks = chunker.chunk_text("doc", &text);
        assert!(chunks.len() > 1);
        assert_eq!(reassemble(&chunks), normalised(&text));
    }
}
