//! Article loading: resolve a CLI input into readable Japanese text.
//!
//! The input is tried as a URL (fetched and stripped to plain text), then
//! as a local file path, and finally as raw text, accepted only when it
//! actually contains Japanese script.

use std::path::Path;
use std::time::Duration;

use html2text::from_read;
use reqwest::Client;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum ArticleError {
    #[error("could not fetch the page: {0}")]
    Fetch(String),
    #[error("page fetch returned HTTP {0}")]
    HttpStatus(u16),
    #[error("could not read {path}: {message}")]
    Unreadable { path: String, message: String },
    #[error("input is neither a URL, a readable file, nor Japanese text")]
    NotJapanese,
}

/// True if the input contains hiragana, katakana, CJK ideographs, or
/// half-width katakana.
pub fn contains_japanese(input: &str) -> bool {
    input.chars().any(|c| {
        matches!(c,
            '\u{3040}'..='\u{30ff}'
            | '\u{3400}'..='\u{4dbf}'
            | '\u{4e00}'..='\u{9fff}'
            | '\u{f900}'..='\u{faff}'
            | '\u{ff66}'..='\u{ff9f}')
    })
}

fn is_url(input: &str) -> bool {
    matches!(
        reqwest::Url::parse(input),
        Ok(url) if url.scheme() == "http" || url.scheme() == "https"
    )
}

/// Strip markup and reader noise from a fetched page.
///
/// Newlines are preserved; the segmenter needs them for paragraph
/// boundaries. Bracketed and parenthesized spans (footnote markers and
/// similar reader noise) are dropped.
pub fn extract_text(html: &str) -> String {
    let plain = from_read(html.as_bytes(), usize::MAX);

    let horizontal_ws = regex::Regex::new(r"[ \t]+").unwrap();
    let brackets = regex::Regex::new(r"\[[^\]\n]*\]").unwrap();
    let parens = regex::Regex::new(r"\([^)\n]*\)").unwrap();

    let collapsed = horizontal_ws.replace_all(&plain, " ");
    let without_brackets = brackets.replace_all(&collapsed, "");
    let without_parens = parens.replace_all(&without_brackets, "");
    without_parens.trim().to_string()
}

/// Resolve `input` into article text.
pub async fn load(input: &str, timeout_secs: u64) -> Result<String, ArticleError> {
    if is_url(input) {
        info!("Fetching {input}");
        return fetch_page(input, timeout_secs).await;
    }

    let path = Path::new(input);
    if path.is_file() {
        debug!("Reading article from {}", path.display());
        return std::fs::read_to_string(path).map_err(|e| ArticleError::Unreadable {
            path: input.to_string(),
            message: e.to_string(),
        });
    }

    if contains_japanese(input) {
        return Ok(input.to_string());
    }
    Err(ArticleError::NotJapanese)
}

async fn fetch_page(url: &str, timeout_secs: u64) -> Result<String, ArticleError> {
    let client = Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .expect("Failed to create HTTP client");

    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| ArticleError::Fetch(e.to_string()))?;
    if !resp.status().is_success() {
        return Err(ArticleError::HttpStatus(resp.status().as_u16()));
    }

    let html = resp
        .text()
        .await
        .map_err(|e| ArticleError::Fetch(e.to_string()))?;
    let text = extract_text(&html);
    debug!("Extracted {} chars of text", text.chars().count());
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_japanese_scripts() {
        assert!(contains_japanese("ひらがな"));
        assert!(contains_japanese("カタカナ"));
        assert!(contains_japanese("漢字"));
        assert!(contains_japanese("mixed ｱｲｳ text"));
        assert!(!contains_japanese("english only"));
        assert!(!contains_japanese("1234 !?"));
    }

    #[test]
    fn recognizes_http_urls_only() {
        assert!(is_url("https://example.com/blog/1"));
        assert!(is_url("http://localhost:3000/"));
        assert!(!is_url("ftp://example.com"));
        assert!(!is_url("今日は晴れです。"));
        assert!(!is_url("notes.txt"));
    }

    #[test]
    fn extract_strips_tags_and_noise() {
        let html = "<html><body><p>今日は晴れです。[1]（注）</p><p>散歩に行きました。</p></body></html>";
        let text = extract_text(html);

        assert!(!text.contains('<'));
        assert!(text.contains("今日は晴れです。"));
        assert!(text.contains("散歩に行きました。"));
        assert!(!text.contains("[1]"));
    }

    #[test]
    fn extract_keeps_paragraph_newlines() {
        let html = "<p>一段落目。</p><p>二段落目。</p>";
        let text = extract_text(html);

        assert!(
            text.contains('\n'),
            "paragraphs should stay on separate lines: {text:?}"
        );
    }

    #[tokio::test]
    async fn raw_japanese_text_passes_through() {
        let text = load("今日は晴れです。", 5).await.unwrap();
        assert_eq!(text, "今日は晴れです。");
    }

    #[tokio::test]
    async fn non_japanese_raw_input_is_rejected() {
        let result = load("just some english", 5).await;
        assert!(matches!(result, Err(ArticleError::NotJapanese)));
    }
}
