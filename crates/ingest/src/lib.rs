pub mod chunk;
pub mod chunker;
pub mod reader;
pub mod retry;
pub mod section;

pub use chunk::{Chunk, reassemble};
pub use chunker::{Chunker, ChunkerConfig};
pub use reader::{ExtractedText, FileReader, PdfFetcher, TextFetcher};
pub use retry::RetryPolicy;
pub use section::{Section, detect_section};

/// arXiv PDF location for an identifier such as `2308.04079`.
pub fn arxiv_pdf_url(arxiv_id: &str) -> String {
    format!("https://arxiv.org/pdf/{}.pdf", arxiv_id.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arxiv_urls() {
        assert_eq!(arxiv_pdf_url(" 2308.04079 "), "https://arxiv.org/pdf/2308.04079.pdf");
    }
}
