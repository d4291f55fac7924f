//! Paragraph-bounded text chunking.
//!
//! A paragraph is a trimmed, non-empty block separated by a blank line.
//! Paragraphs are packed greedily into chunks of at most `max_chars`
//! characters (joined by a blank line) and never split; a paragraph longer
//! than the budget becomes a chunk of its own.

/// Separator placed between paragraphs inside a chunk
pub const PARAGRAPH_SEPARATOR: &str = "\n\n";

/// Split text into trimmed, non-empty paragraphs
pub fn split_paragraphs(text: &str) -> Vec<String> {
    text.replace("\r\n", "\n")
        .split(PARAGRAPH_SEPARATOR)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Pack paragraphs into chunks of at most `max_chars` characters
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for paragraph in split_paragraphs(text) {
        let len = paragraph.chars().count();

        if current.is_empty() {
            current = paragraph;
            current_len = len;
            continue;
        }

        if current_len + PARAGRAPH_SEPARATOR.len() + len > max_chars {
            chunks.push(std::mem::take(&mut current));
            current = paragraph;
            current_len = len;
        } else {
            current.push_str(PARAGRAPH_SEPARATOR);
            current.push_str(&paragraph);
            current_len += PARAGRAPH_SEPARATOR.len() + len;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}
