//! Content-type routing and hierarchical document splitting.
//!
//! A document is decomposed into ordered chapters, and each chapter into
//! ordered chunk texts, governed by the token budgets in
//! [`ChunkingConfig`](crate::config::ChunkingConfig).
//!
//! # Splitter Variants
//!
//! | Content type | Chapter cut points |
//! |--------------|--------------------|
//! | `legal-norm` | Article markers (`Art. N`, `Título`, `Capítulo`, `Seção`) |
//! | `wiki` | Top-level `#` headings |
//! | `generic` | `##`/`###` headings, falling back to paragraph packing |
//! | `scientific-article`, `technical-documentation` | Heading-aware, halved chapter budget |
//!
//! A splitter that cannot yield at least one chapter returns the entire
//! document as a single chapter containing one chunk.

use crate::config::ChunkingConfig;
use crate::models::ContentType;
use crate::tokenize::{count_tokens, CHARS_PER_TOKEN};

/// A chapter produced by splitting, before persistence assigns an id.
#[derive(Debug, Clone)]
pub struct ChapterDraft {
    pub title: String,
    pub content: String,
    pub order_index: i32,
    pub token_count: usize,
}

// ============ Content-type detection ============

/// Heuristic content-type detection for untagged uploads.
///
/// Legal-norm wins when article markers dominate; wiki when the text is
/// organized under several top-level headings; generic otherwise.
pub fn detect_content_type(text: &str) -> ContentType {
    let mut legal_markers = 0usize;
    let mut h1 = 0usize;
    let mut h2_h3 = 0usize;

    for line in text.lines() {
        let trimmed = line.trim_start();
        if is_legal_marker(trimmed) {
            legal_markers += 1;
        }
        if trimmed.starts_with("# ") {
            h1 += 1;
        } else if trimmed.starts_with("## ") || trimmed.starts_with("### ") {
            h2_h3 += 1;
        }
    }

    if legal_markers >= 3 {
        ContentType::LegalNorm
    } else if h1 >= 2 && h1 >= h2_h3 {
        ContentType::Wiki
    } else {
        ContentType::Generic
    }
}

fn is_legal_marker(line: &str) -> bool {
    const MARKERS: [&str; 8] = [
        "Art.", "Artigo ", "Título ", "Titulo ", "Capítulo ", "Capitulo ", "Seção ", "Secao ",
    ];
    MARKERS.iter().any(|m| line.starts_with(m))
}

// ============ Chapter splitting ============

/// Split a document into ordered chapters per its content type.
pub fn split_document(
    content: &str,
    content_type: ContentType,
    cfg: &ChunkingConfig,
) -> Vec<ChapterDraft> {
    let sections = match content_type {
        ContentType::LegalNorm => cut_on_legal_markers(content),
        ContentType::Wiki => cut_on_headings(content, &["# "]),
        ContentType::Generic => cut_on_headings(content, &["## ", "### "]),
        ContentType::ScientificArticle | ContentType::TechnicalDocumentation => {
            cut_on_headings(content, &["# ", "## ", "### "])
        }
    };

    // Denser material gets a smaller chapter budget.
    let ideal = match content_type {
        ContentType::ScientificArticle | ContentType::TechnicalDocumentation => {
            (cfg.chapter_ideal_tokens / 2).max(1)
        }
        _ => cfg.chapter_ideal_tokens,
    };
    let max = match content_type {
        ContentType::ScientificArticle | ContentType::TechnicalDocumentation => {
            (cfg.chapter_max_tokens / 2).max(1)
        }
        _ => cfg.chapter_max_tokens,
    };

    let mut drafts = Vec::new();
    for section in sections {
        let token_count = count_tokens(&section.content);
        if token_count > max {
            subdivide_section(&section, ideal, &mut drafts);
        } else if !section.content.trim().is_empty() {
            drafts.push(section);
        }
    }

    // Whole document as one chapter when nothing was cut.
    if drafts.is_empty() {
        let trimmed = content.trim();
        drafts.push(Section {
            title: first_heading_title(content).unwrap_or_else(|| "Document".to_string()),
            content: trimmed.to_string(),
        });
    }

    drafts
        .into_iter()
        .enumerate()
        .map(|(i, s)| {
            let token_count = count_tokens(&s.content);
            ChapterDraft {
                title: s.title,
                content: s.content,
                order_index: i as i32,
                token_count,
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
struct Section {
    title: String,
    content: String,
}

fn flush_section(
    title: Option<String>,
    lines: &[&str],
    fallback_title: Option<&str>,
    sections: &mut Vec<Section>,
) {
    let body = lines.join("\n");
    if body.trim().is_empty() {
        return;
    }
    let title = title
        .or_else(|| match fallback_title {
            Some(fixed) => Some(fixed.to_string()),
            None => first_heading_title(&body),
        })
        .unwrap_or_else(|| format!("Part {}", sections.len() + 1));
    sections.push(Section {
        title,
        content: body.trim().to_string(),
    });
}

/// Cut on any heading whose prefix is in `levels`. Content before the first
/// cut point forms a preamble section titled by its leading heading, when
/// one exists.
fn cut_on_headings(content: &str, levels: &[&str]) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut current_title: Option<String> = None;
    let mut current: Vec<&str> = Vec::new();

    for line in content.lines() {
        let trimmed = line.trim_start();
        if let Some(level) = levels.iter().find(|l| trimmed.starts_with(*l)) {
            flush_section(current_title.take(), &current, None, &mut sections);
            current.clear();
            current_title = Some(trimmed[level.len()..].trim().to_string());
        }
        current.push(line);
    }
    flush_section(current_title, &current, None, &mut sections);

    sections
}

fn cut_on_legal_markers(content: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut current_title: Option<String> = None;
    let mut current: Vec<&str> = Vec::new();

    for line in content.lines() {
        let trimmed = line.trim_start();
        if is_legal_marker(trimmed) {
            flush_section(
                current_title.take(),
                &current,
                Some("Preâmbulo"),
                &mut sections,
            );
            current.clear();
            // The marker line itself names the chapter.
            current_title = Some(truncate_title(trimmed));
        }
        current.push(line);
    }
    flush_section(current_title, &current, Some("Preâmbulo"), &mut sections);

    sections
}

fn first_heading_title(text: &str) -> Option<String> {
    text.lines().find_map(|line| {
        let trimmed = line.trim_start();
        trimmed
            .strip_prefix('#')
            .map(|rest| rest.trim_start_matches('#').trim().to_string())
            .filter(|t| !t.is_empty())
    })
}

fn truncate_title(line: &str) -> String {
    const MAX_TITLE_CHARS: usize = 120;
    if line.chars().count() <= MAX_TITLE_CHARS {
        line.to_string()
    } else {
        line.chars().take(MAX_TITLE_CHARS).collect()
    }
}

/// Subdivide an oversized section into ideal-budget pieces by paragraph
/// packing, numbering the continuation titles.
fn subdivide_section(section: &Section, ideal_tokens: usize, out: &mut Vec<Section>) {
    let pieces = pack_paragraphs(&section.content, ideal_tokens * CHARS_PER_TOKEN);
    let total = pieces.len();
    for (i, piece) in pieces.into_iter().enumerate() {
        let title = if total == 1 {
            section.title.clone()
        } else {
            format!("{} ({}/{})", section.title, i + 1, total)
        };
        out.push(Section {
            title,
            content: piece,
        });
    }
}

// ============ Chunking ============

/// Split one chapter body into ordered chunk texts.
///
/// 1. A chapter within the ideal chunk budget is a single chunk.
/// 2. Markdown subtitles (`##`, `###`) bound candidate blocks when present.
/// 3. Otherwise paragraphs, then sentences, are packed into blocks of at
///    most `chunk_max_tokens × 4` characters.
/// 4. Blocks shorter than `chunk_min_tokens × 4` characters merge with the
///    following neighbor while the merge stays within
///    `chunk_ideal_tokens × 4 + 200` characters.
///
/// The final block may exceed the ideal budget by the remainder.
pub fn chunk_chapter(text: &str, cfg: &ChunkingConfig) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return vec![String::new()];
    }

    if count_tokens(trimmed) <= cfg.chunk_ideal_tokens {
        return vec![trimmed.to_string()];
    }

    let mut blocks = split_on_subtitles(trimmed);
    if blocks.len() <= 1 {
        blocks = pack_paragraphs(trimmed, cfg.chunk_max_tokens * CHARS_PER_TOKEN);
    }

    let min_chars = cfg.chunk_min_tokens * CHARS_PER_TOKEN;
    let merge_limit = cfg.chunk_ideal_tokens * CHARS_PER_TOKEN + 200;
    let merged = merge_small_blocks(blocks, min_chars, merge_limit);

    if merged.is_empty() {
        vec![trimmed.to_string()]
    } else {
        merged
    }
}

/// Subtitle-bounded candidate blocks. Content before the first subtitle is
/// its own block.
fn split_on_subtitles(text: &str) -> Vec<String> {
    let mut blocks: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("## ") || trimmed.starts_with("### ") {
            let body = current.join("\n");
            if !body.trim().is_empty() {
                blocks.push(body.trim().to_string());
            }
            current.clear();
        }
        current.push(line);
    }
    let body = current.join("\n");
    if !body.trim().is_empty() {
        blocks.push(body.trim().to_string());
    }

    blocks
}

/// Pack paragraphs into blocks of at most `max_chars`. A paragraph that
/// alone exceeds the budget is packed sentence by sentence.
fn pack_paragraphs(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut blocks = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        if trimmed.len() > max_chars {
            if !buf.is_empty() {
                blocks.push(std::mem::take(&mut buf));
            }
            pack_sentences(trimmed, max_chars, &mut blocks);
            continue;
        }

        let would_be = if buf.is_empty() {
            trimmed.len()
        } else {
            buf.len() + 2 + trimmed.len()
        };
        if would_be > max_chars && !buf.is_empty() {
            blocks.push(std::mem::take(&mut buf));
        }
        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(trimmed);
    }

    if !buf.is_empty() {
        blocks.push(buf);
    }

    blocks
}

fn pack_sentences(para: &str, max_chars: usize, out: &mut Vec<String>) {
    let mut buf = String::new();

    for sentence in split_sentences(para) {
        if buf.len() + sentence.len() > max_chars && !buf.is_empty() {
            out.push(std::mem::take(&mut buf));
        }

        if sentence.len() > max_chars {
            // Pathological run-on: hard split at a space boundary.
            let mut remaining = sentence;
            while remaining.len() > max_chars {
                let limit = floor_char_boundary(remaining, max_chars);
                let mut cut = remaining[..limit]
                    .rfind(' ')
                    .map(|pos| pos + 1)
                    .unwrap_or(limit);
                if cut == 0 {
                    // Budget smaller than one character; take one anyway.
                    cut = remaining
                        .char_indices()
                        .nth(1)
                        .map(|(i, _)| i)
                        .unwrap_or(remaining.len());
                }
                out.push(remaining[..cut].trim().to_string());
                remaining = &remaining[cut..];
            }
            buf.push_str(remaining);
        } else {
            buf.push_str(sentence);
        }
    }

    if !buf.trim().is_empty() {
        out.push(buf.trim().to_string());
    }
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Split on sentence-ending punctuation followed by whitespace, keeping the
/// delimiter with the preceding sentence.
fn split_sentences(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut sentences = Vec::new();
    let mut start = 0usize;

    for (i, &b) in bytes.iter().enumerate() {
        if matches!(b, b'.' | b'!' | b'?') {
            let next = bytes.get(i + 1);
            if matches!(next, Some(b' ') | Some(b'\n') | None) {
                let end = (i + 2).min(text.len());
                if text.is_char_boundary(end) {
                    sentences.push(&text[start..end]);
                    start = end;
                }
            }
        }
    }

    if start < text.len() {
        sentences.push(&text[start..]);
    }

    sentences
}

fn merge_small_blocks(blocks: Vec<String>, min_chars: usize, merge_limit: usize) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    let mut iter = blocks.into_iter().peekable();

    while let Some(mut block) = iter.next() {
        while block.len() < min_chars {
            match iter.peek() {
                Some(next) if block.len() + 2 + next.len() <= merge_limit => {
                    let next = iter.next().unwrap();
                    block.push_str("\n\n");
                    block.push_str(&next);
                }
                _ => break,
            }
        }
        merged.push(block);
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budgets() -> ChunkingConfig {
        ChunkingConfig::default()
    }

    #[test]
    fn test_generic_split_headings_with_preamble() {
        let doc = "# A\npara1.\n\n## B\nshort.";
        let chapters = split_document(doc, ContentType::Generic, &budgets());
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].title, "A");
        assert_eq!(chapters[0].order_index, 0);
        assert!(chapters[0].content.contains("para1."));
        assert_eq!(chapters[1].title, "B");
        assert_eq!(chapters[1].order_index, 1);
        assert!(chapters[1].content.contains("short."));
    }

    #[test]
    fn test_wiki_split_top_level_headings() {
        let doc = "# First\nalpha text.\n\n# Second\nbeta text.\n\n# Third\ngamma text.";
        let chapters = split_document(doc, ContentType::Wiki, &budgets());
        assert_eq!(chapters.len(), 3);
        assert_eq!(chapters[0].title, "First");
        assert_eq!(chapters[2].title, "Third");
        for (i, ch) in chapters.iter().enumerate() {
            assert_eq!(ch.order_index, i as i32);
        }
    }

    #[test]
    fn test_legal_split_article_markers() {
        let doc = "Preâmbulo da norma.\n\nArt. 1 Esta lei dispõe sobre o tema.\n\n\
                   Art. 2 Ficam revogadas as disposições.\n\nCapítulo II Das Penas\ntexto.";
        let chapters = split_document(doc, ContentType::LegalNorm, &budgets());
        assert_eq!(chapters.len(), 4);
        assert_eq!(chapters[0].title, "Preâmbulo");
        assert!(chapters[1].title.starts_with("Art. 1"));
        assert!(chapters[3].title.starts_with("Capítulo II"));
    }

    #[test]
    fn test_no_structure_yields_single_chapter() {
        let doc = "Just a short note without any headings.";
        let chapters = split_document(doc, ContentType::Generic, &budgets());
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].order_index, 0);
        assert_eq!(chapters[0].content, doc);
    }

    #[test]
    fn test_oversized_chapter_subdivided() {
        let mut cfg = budgets();
        cfg.chapter_ideal_tokens = 10;
        cfg.chapter_min_tokens = 5;
        cfg.chapter_max_tokens = 20;
        let body = (0..40)
            .map(|i| format!("Paragraph number {} with several words inside.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let doc = format!("## Long\n{}", body);
        let chapters = split_document(&doc, ContentType::Generic, &cfg);
        assert!(chapters.len() > 1);
        assert!(chapters[0].title.starts_with("Long ("));
        for (i, ch) in chapters.iter().enumerate() {
            assert_eq!(ch.order_index, i as i32);
        }
    }

    #[test]
    fn test_detect_legal_norm() {
        let doc = "Art. 1 Primeiro.\nArt. 2 Segundo.\nArt. 3 Terceiro.";
        assert_eq!(detect_content_type(doc), ContentType::LegalNorm);
    }

    #[test]
    fn test_detect_wiki() {
        let doc = "# One\ntext\n\n# Two\ntext\n\n# Three\ntext";
        assert_eq!(detect_content_type(doc), ContentType::Wiki);
    }

    #[test]
    fn test_detect_generic_default() {
        assert_eq!(
            detect_content_type("plain prose with nothing special"),
            ContentType::Generic
        );
    }

    #[test]
    fn test_chunk_small_chapter_single() {
        let chunks = chunk_chapter("A short chapter body.", &budgets());
        assert_eq!(chunks, vec!["A short chapter body.".to_string()]);
    }

    #[test]
    fn test_chunk_splits_on_subtitles() {
        let mut cfg = budgets();
        cfg.chunk_ideal_tokens = 10;
        cfg.chunk_min_tokens = 2;
        cfg.chunk_max_tokens = 40;
        let text = "intro paragraph long enough to matter here.\n\n\
                    ## First part\ncontent of the first part goes here.\n\n\
                    ## Second part\ncontent of the second part goes here.";
        let chunks = chunk_chapter(text, &cfg);
        assert!(chunks.len() >= 2, "expected subtitle blocks, got {:?}", chunks);
        assert!(chunks.iter().any(|c| c.contains("## First part")));
    }

    #[test]
    fn test_chunk_packs_paragraphs_without_subtitles() {
        let mut cfg = budgets();
        cfg.chunk_ideal_tokens = 10;
        cfg.chunk_min_tokens = 2;
        cfg.chunk_max_tokens = 12;
        let text = (0..12)
            .map(|i| format!("Sentence group {} with a handful of words.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_chapter(&text, &cfg);
        assert!(chunks.len() > 1);
        let max_chars = cfg.chunk_max_tokens * CHARS_PER_TOKEN;
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.len() <= max_chars + 200, "oversized chunk: {}", chunk.len());
        }
    }

    #[test]
    fn test_chunk_merges_small_blocks_forward() {
        let blocks = vec![
            "tiny".to_string(),
            "also small".to_string(),
            "a block that is comfortably large enough on its own".to_string(),
        ];
        let merged = merge_small_blocks(blocks, 20, 200);
        assert!(merged.len() < 3);
        assert!(merged[0].contains("tiny"));
        assert!(merged[0].contains("also small"));
    }

    #[test]
    fn test_sentences_keep_delimiters() {
        let sentences = split_sentences("One. Two! Three? Four");
        assert_eq!(sentences.len(), 4);
        assert!(sentences[0].starts_with("One."));
        assert!(sentences[3].contains("Four"));
    }

    #[test]
    fn test_chunk_empty_chapter() {
        let chunks = chunk_chapter("", &budgets());
        assert_eq!(chunks.len(), 1);
    }
}
