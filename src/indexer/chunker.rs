//! Overlapping fixed-size text chunking.
//!
//! Each chunk holds at most `chunk_size` characters. A chunk after the first
//! starts `chunk_overlap` characters before the previous one ends, so
//! `chunks[0] + chunks[1][overlap..] + ...` is the original text. Cut points
//! prefer paragraph, line, sentence and word boundaries, in that order,
//! before falling back to a hard cut.
use crate::error::{RagError, Result};
use crate::models::{Chunk, Document};

/// Sentence-terminating punctuation that must be followed by whitespace.
const TERMINATORS: [char; 3] = ['.', '!', '?'];

/// Boundary kinds, most preferred first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    Paragraph,
    Line,
    Sentence,
    Word,
}

impl Boundary {
    const PREFERENCE: [Boundary; 4] = [
        Boundary::Paragraph,
        Boundary::Line,
        Boundary::Sentence,
        Boundary::Word,
    ];

    /// Whether cutting between `chars[p - 1]` and `chars[p]` lands on this
    /// kind of boundary. Requires `0 < p < chars.len()`.
    fn matches(self, chars: &[char], p: usize) -> bool {
        let prev = chars[p - 1];
        match self {
            Boundary::Paragraph => p >= 2 && prev == '\n' && chars[p - 2] == '\n',
            Boundary::Line => prev == '\n',
            Boundary::Sentence => {
                prev == '。' || (p >= 2 && prev.is_whitespace() && TERMINATORS.contains(&chars[p - 2]))
            }
            Boundary::Word => !(prev.is_alphanumeric() && chars[p].is_alphanumeric()),
        }
    }
}

/// Splits documents into overlapping passages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextChunker {
    /// `chunk_overlap` must be smaller than `chunk_size`, which must be positive.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::Configuration(
                "chunk_size must be positive".into(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(RagError::Configuration(format!(
                "chunk_overlap ({chunk_overlap}) must be smaller than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Chunk a document, in order.
    pub fn chunk(&self, document: &Document) -> Vec<Chunk> {
        self.split_with_offsets(&document.raw_text)
            .into_iter()
            .enumerate()
            .map(|(sequence_index, (char_offset, text))| Chunk {
                id: format!("{}#{sequence_index}", document.id),
                document_id: document.id.clone(),
                source: document.id.clone(),
                text,
                sequence_index,
                char_offset,
            })
            .collect()
    }

    /// Split raw text into chunk strings.
    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with_offsets(text)
            .into_iter()
            .map(|(_, s)| s)
            .collect()
    }

    fn split_with_offsets(&self, text: &str) -> Vec<(usize, String)> {
        let chars: Vec<char> = text.chars().collect();
        let n = chars.len();
        if n == 0 {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        let mut start = 0;
        loop {
            let end = if n - start <= self.chunk_size {
                n
            } else {
                self.find_cut(&chars, start)
            };
            chunks.push((start, chars[start..end].iter().collect()));
            if end == n {
                break;
            }
            start = end - self.chunk_overlap;
        }
        chunks
    }

    /// Choose the end of the chunk starting at `start`. Only called when the
    /// remaining text is longer than `chunk_size`.
    fn find_cut(&self, chars: &[char], start: usize) -> usize {
        let hi = start + self.chunk_size;
        // Cutting below this would either leave no room for the overlap or
        // produce needlessly small chunks.
        let lo = start + (self.chunk_size / 2).max(self.chunk_overlap + 1);

        for boundary in Boundary::PREFERENCE {
            if let Some(p) = (lo..=hi).rev().find(|&p| boundary.matches(chars, p)) {
                return p;
            }
        }
        hi
    }
}
