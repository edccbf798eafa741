use crate::chunker::normalize_whitespace;
use crate::error::PipelineError;
use crate::models::{Document, PageOffset, SourceDescriptor};
use scraper::{Html, Selector};
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use walkdir::WalkDir;

const WEB_USER_AGENT: &str =
    "Mozilla/5.0 (compatible; corpusqa/0.1; +https://crates.io/crates/corpusqa-core)";

#[derive(Debug, Clone, Default)]
pub struct LoaderOptions {
    /// Base URL of an S3-compatible object store gateway. Object-store
    /// sources fail as a configuration error when this is unset.
    pub object_store_endpoint: Option<String>,
    pub object_store_token: Option<String>,
    /// Timeout applied to every fetch this loader performs.
    pub timeout: Option<Duration>,
}

/// Fetches raw content from a named source and normalizes it to plain text
/// plus provenance metadata. One loader serves all three source kinds.
pub struct DocumentLoader {
    client: reqwest::Client,
    options: LoaderOptions,
}

impl DocumentLoader {
    pub fn new(options: LoaderOptions) -> Result<Self, PipelineError> {
        let mut builder = reqwest::Client::builder().user_agent(WEB_USER_AGENT);
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|error| PipelineError::Configuration(format!("http client: {error}")))?;
        Ok(Self { client, options })
    }

    pub async fn load(&self, descriptor: &SourceDescriptor) -> Result<Document, PipelineError> {
        let document = match descriptor {
            SourceDescriptor::LocalFile { path } => self.load_local(descriptor, path).await?,
            SourceDescriptor::ObjectStore { bucket, key } => {
                self.load_object(descriptor, bucket, key).await?
            }
            SourceDescriptor::Web { url } => self.load_web(descriptor, url).await?,
        };

        if document.text.trim().is_empty() {
            return Err(unavailable(descriptor, "source contained no extractable text"));
        }

        debug!(
            source = %descriptor,
            fingerprint = %document.fingerprint,
            text_len = document.text.len(),
            pages = document.page_offsets.len(),
            "source loaded"
        );
        Ok(document)
    }

    async fn load_local(
        &self,
        descriptor: &SourceDescriptor,
        path: &str,
    ) -> Result<Document, PipelineError> {
        let raw = tokio::fs::read(path)
            .await
            .map_err(|error| unavailable(descriptor, &error.to_string()))?;

        if is_pdf_path(path) {
            let (text, pages) = extract_pdf_text(&raw)
                .map_err(|reason| unavailable(descriptor, &reason))?;
            Ok(Document::with_pages(descriptor.clone(), &raw, text, pages))
        } else {
            let text = String::from_utf8_lossy(&raw).into_owned();
            Ok(Document::new(descriptor.clone(), &raw, text))
        }
    }

    async fn load_object(
        &self,
        descriptor: &SourceDescriptor,
        bucket: &str,
        key: &str,
    ) -> Result<Document, PipelineError> {
        let endpoint = self
            .options
            .object_store_endpoint
            .as_deref()
            .ok_or_else(|| {
                PipelineError::Configuration(
                    "object store endpoint is not configured".to_string(),
                )
            })?;

        let url = format!("{}/{bucket}/{key}", endpoint.trim_end_matches('/'));
        let mut request = self.client.get(&url);
        if let Some(token) = &self.options.object_store_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|error| unavailable(descriptor, &error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(unavailable(
                descriptor,
                &format!("object store returned {status}"),
            ));
        }

        let raw = response
            .bytes()
            .await
            .map_err(|error| unavailable(descriptor, &error.to_string()))?;

        if is_pdf_path(key) {
            let (text, pages) = extract_pdf_text(&raw)
                .map_err(|reason| unavailable(descriptor, &reason))?;
            Ok(Document::with_pages(descriptor.clone(), &raw, text, pages))
        } else {
            let text = String::from_utf8_lossy(&raw).into_owned();
            Ok(Document::new(descriptor.clone(), &raw, text))
        }
    }

    async fn load_web(
        &self,
        descriptor: &SourceDescriptor,
        url: &str,
    ) -> Result<Document, PipelineError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|error| unavailable(descriptor, &error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(unavailable(descriptor, &format!("server returned {status}")));
        }

        let looks_like_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.contains("html"))
            .unwrap_or(false);

        let body = response
            .text()
            .await
            .map_err(|error| unavailable(descriptor, &error.to_string()))?;

        let text = if looks_like_html || body.trim_start().starts_with('<') {
            strip_html(&body)
        } else {
            body.clone()
        };

        Ok(Document::new(descriptor.clone(), body.as_bytes(), text))
    }
}

/// A local directory descriptor stands for every regular file under it;
/// anything else resolves to itself.
pub fn expand_sources(descriptor: &SourceDescriptor) -> Vec<SourceDescriptor> {
    if let SourceDescriptor::LocalFile { path } = descriptor {
        if Path::new(path).is_dir() {
            let mut files: Vec<String> = WalkDir::new(path)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.path().to_string_lossy().to_string())
                .collect();
            files.sort_unstable();
            return files
                .into_iter()
                .map(|path| SourceDescriptor::LocalFile { path })
                .collect();
        }
    }
    vec![descriptor.clone()]
}

fn unavailable(descriptor: &SourceDescriptor, reason: &str) -> PipelineError {
    PipelineError::SourceUnavailable {
        descriptor: descriptor.clone(),
        reason: reason.to_string(),
    }
}

fn is_pdf_path(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

/// Page-by-page extraction; page start offsets are kept so chunks can cite
/// the page they came from.
fn extract_pdf_text(raw: &[u8]) -> Result<(String, Vec<PageOffset>), String> {
    let document =
        lopdf::Document::load_mem(raw).map_err(|error| format!("pdf parse error: {error}"))?;

    let mut text = String::new();
    let mut pages = Vec::new();
    for (page_no, _page_id) in document.get_pages() {
        let page_text = document
            .extract_text(&[page_no])
            .map_err(|error| format!("pdf text extraction error on page {page_no}: {error}"))?;
        if page_text.trim().is_empty() {
            continue;
        }
        if !text.is_empty() {
            text.push_str("\n\n");
        }
        pages.push(PageOffset {
            page: page_no,
            offset: text.len(),
        });
        text.push_str(page_text.trim());
    }

    if pages.is_empty() {
        return Err("pdf had no readable page text".to_string());
    }
    Ok((text, pages))
}

/// Best-effort boilerplate removal: prefer block-level content elements and
/// fall back to the whole document's text when a page uses none of them.
fn strip_html(html: &str) -> String {
    let document = Html::parse_document(html);

    if let Ok(selector) =
        Selector::parse("p, h1, h2, h3, h4, h5, h6, li, td, th, pre, blockquote")
    {
        let mut sections = Vec::new();
        for element in document.select(&selector) {
            let text = normalize_whitespace(&element.text().collect::<Vec<_>>().join(" "));
            if !text.is_empty() {
                sections.push(text);
            }
        }
        if !sections.is_empty() {
            return sections.join("\n\n");
        }
    }

    normalize_whitespace(
        &document
            .root_element()
            .text()
            .collect::<Vec<_>>()
            .join(" "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn loader() -> DocumentLoader {
        DocumentLoader::new(LoaderOptions::default()).unwrap()
    }

    #[tokio::test]
    async fn loads_a_local_text_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, "Cats are mammals. Dogs are mammals too.").unwrap();

        let descriptor = SourceDescriptor::parse(path.to_str().unwrap()).unwrap();
        let document = loader().load(&descriptor).await.unwrap();

        assert_eq!(document.text, "Cats are mammals. Dogs are mammals too.");
        assert!(document.page_offsets.is_empty());
        assert_eq!(document.document_id, descriptor.document_id());
    }

    #[tokio::test]
    async fn missing_file_is_source_unavailable() {
        let descriptor = SourceDescriptor::parse("/definitely/not/here.txt").unwrap();
        let result = loader().load(&descriptor).await;
        assert!(matches!(
            result,
            Err(PipelineError::SourceUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn empty_file_is_source_unavailable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        fs::write(&path, "   \n ").unwrap();

        let descriptor = SourceDescriptor::parse(path.to_str().unwrap()).unwrap();
        let result = loader().load(&descriptor).await;
        assert!(matches!(
            result,
            Err(PipelineError::SourceUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn unreadable_pdf_is_source_unavailable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        fs::write(&path, b"%PDF-1.4\n%not really a pdf").unwrap();

        let descriptor = SourceDescriptor::parse(path.to_str().unwrap()).unwrap();
        let result = loader().load(&descriptor).await;
        assert!(matches!(
            result,
            Err(PipelineError::SourceUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn object_store_without_endpoint_is_a_configuration_error() {
        let descriptor = SourceDescriptor::parse("s3://docs/file.txt").unwrap();
        let result = loader().load(&descriptor).await;
        assert!(matches!(result, Err(PipelineError::Configuration(_))));
    }

    #[test]
    fn directory_descriptor_expands_to_its_files() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nested");
        fs::create_dir(&nested).unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::write(nested.join("b.txt"), "b").unwrap();

        let descriptor = SourceDescriptor::parse(dir.path().to_str().unwrap()).unwrap();
        let expanded = expand_sources(&descriptor);
        assert_eq!(expanded.len(), 2);
        assert!(expanded
            .iter()
            .all(|item| matches!(item, SourceDescriptor::LocalFile { .. })));
    }

    #[test]
    fn plain_file_descriptor_expands_to_itself() {
        let descriptor = SourceDescriptor::parse("/data/one.txt").unwrap();
        assert_eq!(expand_sources(&descriptor), vec![descriptor]);
    }

    #[test]
    fn html_is_stripped_to_content_text() {
        let html = r#"<html><head><style>.x{color:red}</style><script>var x=1;</script></head>
            <body><h1>Title</h1><p>First paragraph.</p><p>Second  paragraph.</p></body></html>"#;
        let text = strip_html(html);
        assert!(text.contains("Title"));
        assert!(text.contains("First paragraph."));
        assert!(text.contains("Second paragraph."));
        assert!(!text.contains("var x=1"));
        assert!(!text.contains("color:red"));
    }
}
