// Sentence Splitter
//
// Packs whole sentences into chunks bounded by a character budget.
// Sentences that do not fit on their own are split on word boundaries,
// and words that do not fit are split on characters.

use tracing::debug;

use super::{Document, Node};

const SENTENCE_END: &[char] = &['.', '!', '?'];

// Full-width terminators end a sentence even without following whitespace.
const FULL_WIDTH_END: &[char] = &['。', '！', '？'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentenceSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl SentenceSplitter {
    /// `chunk_size` is clamped to at least 1 and `chunk_overlap` to less
    /// than `chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn split(&self, documents: &[Document]) -> Vec<Node> {
        let nodes: Vec<Node> = documents
            .iter()
            .flat_map(|doc| {
                self.split_text(&doc.text)
                    .into_iter()
                    .map(move |text| Node::from_document(doc, text))
            })
            .collect();

        debug!(documents = documents.len(), nodes = nodes.len(), "documents split");
        nodes
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        let mut pieces = Vec::new();
        for sentence in sentences(text) {
            if char_len(sentence) <= self.chunk_size {
                pieces.push(sentence.to_string());
            } else {
                pieces.extend(split_words(sentence, self.chunk_size));
            }
        }
        self.pack(pieces)
    }

    fn pack(&self, pieces: Vec<String>) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_len = 0;

        for piece in pieces {
            let len = char_len(&piece);

            if !current.is_empty() && current_len + 1 + len > self.chunk_size {
                chunks.push(current.join(" "));
                let (kept, kept_len) = self.overlap_tail(&current, len);
                current = kept;
                current_len = kept_len;
            }

            current_len += if current.is_empty() { len } else { len + 1 };
            current.push(piece);
        }

        if !current.is_empty() {
            chunks.push(current.join(" "));
        }
        chunks
    }

    /// Trailing pieces of a finished chunk carried into the next one,
    /// leaving room for the incoming piece.
    fn overlap_tail(&self, chunk: &[String], incoming: usize) -> (Vec<String>, usize) {
        let mut kept = Vec::new();
        let mut kept_len = 0;

        for piece in chunk.iter().rev() {
            let len = char_len(piece) + usize::from(!kept.is_empty());
            if kept_len + len > self.chunk_overlap
                || kept_len + len + 1 + incoming > self.chunk_size
            {
                break;
            }
            kept_len += len;
            kept.push(piece.clone());
        }

        kept.reverse();
        (kept, kept_len)
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split on sentence terminators and line breaks.
fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let next_is_break = chars.peek().map_or(true, |(_, n)| n.is_whitespace());
        if c == '\n' || FULL_WIDTH_END.contains(&c) || (SENTENCE_END.contains(&c) && next_is_break)
        {
            let end = i + c.len_utf8();
            out.push(&text[start..end]);
            start = end;
        }
    }
    out.push(&text[start..]);

    out.into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn split_words(sentence: &str, max: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in sentence.split_whitespace() {
        let len = char_len(word);

        if len > max {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = word.chars().collect();
            out.extend(chars.chunks(max).map(|c| c.iter().collect::<String>()));
            continue;
        }

        if !current.is_empty() && current_len + 1 + len > max {
            out.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += len;
    }

    if !current.is_empty() {
        out.push(current);
    }
    out
}
