//! Preview of documents referenced by messages
//!
//! Plain-text sources are fetched as text, CSV sources are fetched and
//! parsed into rows, anything else is handed back for external display.

use crate::api::ApiError;
use crate::conversation::DocumentRef;
use async_trait::async_trait;

/// Fetches referenced document content
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch_text(&self, src: &str) -> Result<String, ApiError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preview {
    Text(String),
    Csv(Vec<Vec<String>>),
    /// Not previewable here; shown by reference
    External(DocumentRef),
}

pub async fn fetch_preview<F: DocumentFetcher + ?Sized>(
    fetcher: &F,
    document: &DocumentRef,
) -> Result<Preview, ApiError> {
    match document.media_type.as_str() {
        "text/plain" => Ok(Preview::Text(fetcher.fetch_text(&document.src).await?)),
        "text/csv" => {
            let text = fetcher.fetch_text(&document.src).await?;
            Ok(Preview::Csv(parse_csv(&text)))
        }
        other => {
            tracing::debug!(media_type = %other, src = %document.src, "No inline preview");
            Ok(Preview::External(document.clone()))
        }
    }
}

/// Split CSV text into rows of fields.
///
/// Double-quoted fields may contain commas and newlines; `""` inside quotes
/// is a literal quote. Blank lines are skipped.
pub fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, in_quotes) {
            ('"', true) if chars.peek() == Some(&'"') => {
                chars.next();
                field.push('"');
            }
            ('"', true) => in_quotes = false,
            ('"', false) if field.is_empty() => in_quotes = true,
            (',', false) => row.push(std::mem::take(&mut field)),
            ('\r', false) => {}
            ('\n', false) => {
                row.push(std::mem::take(&mut field));
                if !(row.len() == 1 && row[0].is_empty()) {
                    rows.push(std::mem::take(&mut row));
                } else {
                    row.clear();
                }
            }
            (c, _) => field.push(c),
        }
    }

    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}
