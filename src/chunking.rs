/// Represents a text chunk with metadata
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    /// The actual text content of this chunk
    pub text: String,
    /// Estimated token count for this chunk
    pub token_count: usize,
    /// Identifier of the document this chunk belongs to
    pub document_id: String,
    /// Position of this chunk within its document, starting at 0
    pub chunk_index: usize,
}

/// Size targets for chunking
#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    pub target_tokens: usize,
    /// Approximate size of the tail carried over from the previous chunk
    pub overlap_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        ChunkerConfig {
            target_tokens: 500,
            overlap_tokens: 50,
        }
    }
}

/// A unit of text that is never split further, plus the separator that
/// joins it to the previous piece.
struct Piece<'a> {
    text: &'a str,
    separator: &'static str,
    tokens: usize,
}

/// Split text into chunks of approximately `target_tokens` tokens.
///
/// Paragraphs are packed together; paragraphs that are too large are split
/// into sentences, and sentences that are still too large into word windows.
pub fn split_into_chunks(text: &str, document_id: &str, config: &ChunkerConfig) -> Vec<TextChunk> {
    let target = config.target_tokens.max(1);
    let pieces = split_into_pieces(text, target);

    let mut chunk_texts: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_tokens = 0;

    for piece in pieces {
        if current_tokens + piece.tokens > target && current_tokens > 0 {
            let overlap = overlap_tail(&current, config.overlap_tokens);
            chunk_texts.push(std::mem::take(&mut current));
            current = overlap;
            current_tokens = estimate_token_count(&current);
        }

        if !current.is_empty() {
            current.push_str(piece.separator);
        }
        current.push_str(piece.text);
        current_tokens += piece.tokens;
    }

    if !current.trim().is_empty() {
        chunk_texts.push(current);
    }

    chunk_texts
        .into_iter()
        .enumerate()
        .map(|(chunk_index, text)| TextChunk {
            token_count: estimate_token_count(&text),
            text,
            document_id: document_id.to_string(),
            chunk_index,
        })
        .collect()
}

fn split_into_pieces(text: &str, target: usize) -> Vec<Piece<'_>> {
    let mut pieces = Vec::new();

    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let tokens = estimate_token_count(paragraph);
        if tokens <= target {
            pieces.push(Piece {
                text: paragraph,
                separator: "\n\n",
                tokens,
            });
            continue;
        }

        // Split into sentences, keeping the terminating punctuation
        let mut first = true;
        for sentence in paragraph
            .split_inclusive(['.', '!', '?', '\n'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            let separator = if first { "\n\n" } else { " " };
            first = false;

            let tokens = estimate_token_count(sentence);
            if tokens <= target {
                pieces.push(Piece {
                    text: sentence,
                    separator,
                    tokens,
                });
            } else {
                for (i, window) in word_windows(sentence, target).into_iter().enumerate() {
                    pieces.push(Piece {
                        text: window,
                        separator: if i == 0 { separator } else { " " },
                        tokens: estimate_token_count(window),
                    });
                }
            }
        }
    }

    pieces
}

/// Cut `sentence` into contiguous slices of at most `target` tokens each.
fn word_windows(sentence: &str, target: usize) -> Vec<&str> {
    let mut windows = Vec::new();
    let mut start: Option<usize> = None;
    let mut end = 0;
    let mut tokens = 0;

    for (offset, word) in word_spans(sentence) {
        let word_tokens = estimate_token_count(word);
        if let Some(s) = start {
            if tokens + word_tokens > target {
                windows.push(&sentence[s..end]);
                start = None;
                tokens = 0;
            }
        }
        if start.is_none() {
            start = Some(offset);
        }
        end = offset + word.len();
        tokens += word_tokens;
    }

    if let Some(s) = start {
        windows.push(&sentence[s..end]);
    }
    windows
}

/// Words of `text` with their byte offsets.
fn word_spans(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.split(char::is_whitespace)
        .filter(|w| !w.is_empty())
        .map(move |w| (w.as_ptr() as usize - text.as_ptr() as usize, w))
}

/// The last ~`overlap_tokens` worth of `chunk`, starting on a word boundary.
fn overlap_tail(chunk: &str, overlap_tokens: usize) -> String {
    if overlap_tokens == 0 {
        return String::new();
    }

    // Approximate char count for the overlap tokens
    let char_budget = overlap_tokens * 4;
    let total_chars = chunk.chars().count();
    if total_chars <= char_budget {
        return String::new();
    }

    let cut = chunk
        .char_indices()
        .nth(total_chars - char_budget)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let tail = &chunk[cut..];
    match tail.find(char::is_whitespace) {
        Some(space) => tail[space..].trim().to_string(),
        None => String::new(),
    }
}

/// Calculate approximate token count for a text
/// This is a very simple estimation - words plus punctuation
pub fn estimate_token_count(text: &str) -> usize {
    let words = text.split_whitespace().count();
    let punctuation = text.chars().filter(|c| c.is_ascii_punctuation()).count();
    words + punctuation
}
