use log::{debug, info, warn};
use mime_guess::from_path;

use crate::error::DocumentError;

/// Represents an uploaded document with its extracted text
#[derive(Debug, Clone)]
pub struct Document {
    /// Extracted, whitespace-normalized text
    pub content: String,
    /// The document's file name
    pub document_id: String,
    /// The document's MIME type
    pub mime_type: String,
}

impl Document {
    pub fn word_count(&self) -> usize {
        self.content.split_whitespace().count()
    }

    pub fn char_count(&self) -> usize {
        self.content.chars().count()
    }

    /// File name without its extension
    pub fn stem(&self) -> &str {
        file_stem(&self.document_id)
    }
}

/// Strip the last extension from a file name.
pub fn file_stem(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(idx) if idx > 0 => &file_name[..idx],
        _ => file_name,
    }
}

/// Extract text from an uploaded file, choosing the reader from its name.
pub async fn extract_document(file_name: &str, bytes: Vec<u8>) -> Result<Document, DocumentError> {
    let mime_type = from_path(file_name).first_or_octet_stream().to_string();
    debug!("Detected MIME type {} for {}", mime_type, file_name);

    let content = read_document_content(file_name, &mime_type, bytes).await?;
    if content.is_empty() {
        return Err(DocumentError::Empty(file_name.to_string()));
    }

    Ok(Document {
        content,
        document_id: file_name.to_string(),
        mime_type,
    })
}

/// Read content from document bytes based on the MIME type
async fn read_document_content(
    file_name: &str,
    mime_type: &str,
    bytes: Vec<u8>,
) -> Result<String, DocumentError> {
    match mime_type {
        mime if mime.starts_with("application/pdf") => {
            info!("Processing PDF document: {}", file_name);
            // pdf-extract is CPU bound and may panic on malformed input
            let extracted =
                tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
                    .await;

            let content = match extracted {
                Ok(Ok(text)) => text,
                Ok(Err(e)) => {
                    return Err(DocumentError::Pdf {
                        file_name: file_name.to_string(),
                        message: e.to_string(),
                    })
                }
                Err(join_error) => {
                    return Err(DocumentError::Pdf {
                        file_name: file_name.to_string(),
                        message: format!("parser aborted: {}", join_error),
                    })
                }
            };

            let cleaned_content = normalize_whitespace(&content);
            if cleaned_content.is_empty() {
                warn!(
                    "Extracted PDF content of {} is empty or only whitespace",
                    file_name
                );
            }
            Ok(cleaned_content)
        }

        mime if mime.starts_with("text/") => {
            info!("Processing text document: {}", file_name);
            let content = String::from_utf8(bytes)
                .map_err(|_| DocumentError::Encoding(file_name.to_string()))?;
            Ok(normalize_whitespace(&content))
        }

        _ => Err(DocumentError::UnsupportedFormat {
            file_name: file_name.to_string(),
            mime_type: mime_type.to_string(),
        }),
    }
}

/// Normalize whitespace: drop carriage returns, collapse runs of spaces and
/// collapse runs of blank lines into a single paragraph break.
pub fn normalize_whitespace(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len());
    let mut prev_char = ' ';
    let mut newline_count = 0;

    for c in text.chars().filter(|c| *c != '\r') {
        if c == '\n' {
            newline_count += 1;
            continue;
        }

        if newline_count > 0 {
            normalized.push_str(if newline_count >= 2 { "\n\n" } else { "\n" });
            newline_count = 0;
            prev_char = '\n';
        }

        let c = if c == '\t' { ' ' } else { c };
        if !(c == ' ' && (prev_char == ' ' || prev_char == '\n')) {
            normalized.push(c);
        }
        prev_char = c;
    }

    normalized.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_whitespace() {
        let text = "Vendor:  ACME   Corp\n\n\n\nItems:\r\nCoffee";
        assert_eq!(normalize_whitespace(text), "Vendor: ACME Corp\n\nItems:\nCoffee");
    }

    #[test]
    fn test_normalize_strips_line_indentation() {
        assert_eq!(normalize_whitespace("Total:\n\t  $45.00  \n\n"), "Total:\n$45.00");
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("invoice_001.pdf"), "invoice_001");
        assert_eq!(file_stem("archive.tar.gz"), "archive.tar");
        assert_eq!(file_stem("README"), "README");
        assert_eq!(file_stem(".hidden"), ".hidden");
    }

    #[tokio::test]
    async fn test_extract_text_document() {
        let doc = extract_document("receipt.txt", b"Lunch   with client\r\nTotal: $45.00".to_vec())
            .await
            .unwrap();
        assert_eq!(doc.content, "Lunch with client\nTotal: $45.00");
        assert_eq!(doc.mime_type, "text/plain");
        assert_eq!(doc.stem(), "receipt");
        assert_eq!(doc.word_count(), 5);
    }

    #[tokio::test]
    async fn test_rejects_unsupported_format() {
        let err = extract_document("photo.png", vec![0x89, 0x50, 0x4e, 0x47])
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentError::UnsupportedFormat { .. }));
    }

    #[tokio::test]
    async fn test_rejects_empty_text() {
        let err = extract_document("blank.txt", b"  \n\n ".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentError::Empty(_)));
    }

    #[tokio::test]
    async fn test_garbage_pdf_is_an_error() {
        let err = extract_document("broken.pdf", b"definitely not a pdf".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentError::Pdf { .. }));
    }
}
