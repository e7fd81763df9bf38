// lmfetch/src/format.rs

use std::fmt::Write as _;
use crate::chunk::ScoredChunk;

/// Render selected chunks as one Markdown document: files in first-seen
/// (score) order, chunks within a file back in line order.
pub fn format_context(selected: &[ScoredChunk]) -> String {
    let mut file_order: Vec<&str> = Vec::new();
    for sc in selected {
        if !file_order.contains(&sc.chunk.rel_path.as_str()) {
            file_order.push(&sc.chunk.rel_path);
        }
    }

    let mut out = String::new();
    for rel_path in file_order {
        let mut chunks: Vec<&ScoredChunk> = selected
            .iter()
            .filter(|sc| sc.chunk.rel_path == rel_path)
            .collect();
        chunks.sort_by_key(|sc| sc.chunk.start_line);

        let _ = writeln!(out, "## {rel_path}");
        let _ = writeln!(out);
        for sc in chunks {
            let c = &sc.chunk;
            let lines = if c.start_line == c.end_line {
                format!("Line {}", c.start_line)
            } else {
                format!("Lines {}-{}", c.start_line, c.end_line)
            };
            match &c.name {
                Some(name) => {
                    let _ = writeln!(out, "### {lines} ({}: {name})", c.kind.as_str());
                }
                None => {
                    let _ = writeln!(out, "### {lines}");
                }
            }
            let _ = writeln!(out, "```{}", c.lang);
            let _ = writeln!(out, "{}", c.content);
            let _ = writeln!(out, "```");
            let _ = writeln!(out);
        }
    }
    out
}

/* ----------------------------------- tests ----------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{Chunk, ChunkKind};

    fn scored(rel: &str, start: usize, end: usize, name: Option<&str>, score: f64) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                id: Chunk::stable_id(rel, start),
                path: format!("/repo/{rel}"),
                rel_path: rel.to_string(),
                content: format!("line {start}"),
                start_line: start,
                end_line: end,
                kind: ChunkKind::Function,
                name: name.map(|s| s.to_string()),
                lang: "python".to_string(),
                tokens: 5,
            },
            score,
        }
    }

    #[test]
    fn groups_by_file_and_sorts_by_line() {
        let selected = vec![
            scored("src/b.py", 40, 60, Some("late"), 9.0),
            scored("src/a.py", 1, 10, Some("top"), 8.0),
            scored("src/b.py", 1, 20, Some("early"), 7.0),
        ];
        let doc = format_context(&selected);

        // b.py was seen first and keeps that position.
        let b_pos = doc.find("## src/b.py").unwrap();
        let a_pos = doc.find("## src/a.py").unwrap();
        assert!(b_pos < a_pos);

        // Within b.py, chunks come back in line order.
        let early = doc.find("(function: early)").unwrap();
        let late = doc.find("(function: late)").unwrap();
        assert!(early < late);

        assert!(doc.contains("### Lines 1-20 (function: early)"));
        assert!(doc.contains("```python"));
    }

    #[test]
    fn single_line_and_nameless_headers() {
        let selected = vec![
            scored("x.py", 7, 7, None, 1.0),
        ];
        let doc = format_context(&selected);
        assert!(doc.contains("### Line 7\n"));
        assert!(!doc.contains("(function"));
    }

    #[test]
    fn empty_selection_renders_empty_document() {
        assert_eq!(format_context(&[]), "");
    }
}
