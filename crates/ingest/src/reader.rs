use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info};

use crate::retry::RetryPolicy;

/// Text pulled out of a fetched document.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedText {
    pub text: String,
    pub page_count: usize,
}

/// Turns a document location into plain text.
#[async_trait]
pub trait TextFetcher: Send + Sync {
    async fn fetch_and_extract(&self, url: &str) -> Result<ExtractedText>;
}

/// Downloads PDFs over HTTP and extracts their text.
///
/// Plain-text responses (`text/*`) are passed through untouched, which keeps
/// pre-extracted mirrors usable. `file://` locations are read from disk.
#[derive(Clone)]
pub struct PdfFetcher {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl PdfFetcher {
    pub fn new(client: reqwest::Client, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    async fn fetch_once(&self, url: &str) -> Result<ExtractedText> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context(format!("Failed to fetch document: {url}"))?;

        if !response.status().is_success() {
            anyhow::bail!("Document fetch failed: {} ({})", response.status(), url);
        }

        let is_text = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/"));

        let bytes = response
            .bytes()
            .await
            .context("Failed to read document body")?;

        if is_text {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            return Ok(ExtractedText {
                text,
                page_count: 1,
            });
        }

        extract_pdf_text(bytes.to_vec()).await
    }
}

#[async_trait]
impl TextFetcher for PdfFetcher {
    async fn fetch_and_extract(&self, url: &str) -> Result<ExtractedText> {
        if let Some(local) = url.strip_prefix("file://") {
            return FileReader::read_file(Path::new(local)).await;
        }

        let extracted = self
            .retry
            .retry("fetch_pdf", || self.fetch_once(url))
            .await?;

        info!(
            url,
            pages = extracted.page_count,
            chars = extracted.text.len(),
            "Extracted document text"
        );
        Ok(extracted)
    }
}

/// PDF parsing is CPU bound, so it runs on the blocking pool.
pub async fn extract_pdf_text(data: Vec<u8>) -> Result<ExtractedText> {
    let text = tokio::task::spawn_blocking(move || {
        pdf_extract::extract_text_from_mem(&data).map_err(|e| e.to_string())
    })
    .await
    .context("PDF extraction task panicked")?
    .map_err(|e| anyhow::anyhow!("PDF text extraction failed: {e}"))?;

    let page_count = count_pages(&text);
    debug!(page_count, "Parsed PDF");

    Ok(ExtractedText { text, page_count })
}

// pdf-extract separates pages with form feeds.
fn count_pages(text: &str) -> usize {
    let breaks = text.matches('\u{c}').count();
    if text.trim_end_matches('\u{c}').is_empty() {
        return 0;
    }
    breaks + 1 - usize::from(text.ends_with('\u{c}'))
}

pub struct FileReader;

impl FileReader {
    /// Read a local paper: `.txt`/`.md` as-is, `.pdf` through the extractor.
    pub async fn read_file(path: &Path) -> Result<ExtractedText> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match extension.as_str() {
            "txt" | "md" => {
                let text = fs::read_to_string(path)
                    .await
                    .context(format!("Failed to read file: {:?}", path))?;
                Ok(ExtractedText {
                    text,
                    page_count: 1,
                })
            }
            "pdf" => {
                let data = fs::read(path)
                    .await
                    .context(format!("Failed to read file: {:?}", path))?;
                extract_pdf_text(data).await
            }
            _ => anyhow::bail!("Unsupported file format: {}", extension),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> PdfFetcher {
        PdfFetcher::new(reqwest::Client::new(), RetryPolicy::fixed(3, Duration::ZERO))
    }

    #[test]
    fn pages_follow_form_feeds() {
        assert_eq!(count_pages(""), 0);
        assert_eq!(count_pages("one page"), 1);
        assert_eq!(count_pages("one\u{c}two\u{c}three"), 3);
        assert_eq!(count_pages("one\u{c}two\u{c}"), 2);
    }

    #[tokio::test]
    async fn plain_text_passes_through() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/paper.txt"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/plain")
                    .set_body_string("Abstract\nWe extend 3DGS."),
            )
            .mount(&server)
            .await;

        let extracted = fetcher()
            .fetch_and_extract(&format!("{}/paper.txt", server.uri()))
            .await
            .expect("fetch succeeds");

        assert_eq!(extracted.text, "Abstract\nWe extend 3DGS.");
        assert_eq!(extracted.page_count, 1);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky.txt"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky.txt"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/plain; charset=utf-8")
                    .set_body_string("recovered"),
            )
            .mount(&server)
            .await;

        let extracted = fetcher()
            .fetch_and_extract(&format!("{}/flaky.txt", server.uri()))
            .await
            .expect("second attempt succeeds");
        assert_eq!(extracted.text, "recovered");
    }

    #[tokio::test]
    async fn persistent_failures_surface() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(3)
            .mount(&server)
            .await;

        let result = fetcher()
            .fetch_and_extract(&format!("{}/missing.pdf", server.uri()))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn file_urls_read_local_text() {
        let path = std::env::temp_dir().join(format!("ingest-reader-{}.txt", std::process::id()));
        fs::write(&path, "Abstract\nLocal copy.").await.unwrap();

        let extracted = fetcher()
            .fetch_and_extract(&format!("file://{}", path.display()))
            .await
            .expect("local read succeeds");
        fs::remove_file(&path).await.unwrap();

        assert_eq!(extracted.text, "Abstract\nLocal copy.");
        assert_eq!(extracted.page_count, 1);
    }

    #[tokio::test]
    async fn unsupported_extensions_are_rejected() {
        let result = FileReader::read_file(Path::new("paper.docx")).await;
        assert!(result.is_err());
    }
}
