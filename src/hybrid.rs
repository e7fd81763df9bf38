// lmfetch/src/hybrid.rs

use anyhow::Result;
use std::collections::HashMap;
use crate::{
    chunk::{
        Chunk,
        ScoredChunk
    },
    embed::{
        hyde_document,
        Embedder,
        EmbeddingProvider,
        TextGenerator
    },
    ranker::{
        rank_keyword,
        Ranker
    },
};

const KEYWORD_WEIGHT: f64 = 0.4;
const EMBEDDING_WEIGHT: f64 = 0.4;
const IMPORTANCE_WEIGHT: f64 = 0.2;
const MARKDOWN_IMPORTANCE_FACTOR: f64 = 0.6;
const EMBED_CONTENT_CHARS: usize = 8000;

/// Keyword + embedding + file-importance fusion. Composes the keyword
/// ranker; the embedding side retrieves by similarity to a model-written
/// hypothetical answer rather than the raw query.
pub struct HybridRanker<'a, P: EmbeddingProvider> {
    embedder: &'a Embedder<P>,
    generator: &'a dyn TextGenerator,
    file_scores: &'a HashMap<String, f64>,
    progress: Option<&'a dyn Fn(&str)>,
}

impl<'a, P: EmbeddingProvider> HybridRanker<'a, P> {
    pub fn new(
        embedder: &'a Embedder<P>,
        generator: &'a dyn TextGenerator,
        file_scores: &'a HashMap<String, f64>,
        progress: Option<&'a dyn Fn(&str)>,
    ) -> Self {
        Self {
            embedder,
            generator,
            file_scores,
            progress,
        }
    }

    fn report(&self, message: &str) {
        if let Some(cb) = self.progress {
            cb(message);
        }
    }
}

impl<P: EmbeddingProvider> Ranker for HybridRanker<'_, P> {
    fn rank(&self, chunks: Vec<Chunk>, query: &str) -> Result<Vec<ScoredChunk>> {
        self.report("Computing keyword scores");
        let keyword = rank_keyword(chunks, query);
        let keyword_norm = normalize(&keyword);

        self.report("Generating hypothetical answer");
        let hyde = hyde_document(self.generator, query);

        self.report("Computing semantic similarity");
        let texts: Vec<String> = keyword
            .iter()
            .map(|s| enrich_for_embedding(&s.chunk))
            .chain(std::iter::once(hyde))
            .collect();
        let mut vectors = self.embedder.embed_all(&texts);
        let query_vec = vectors.pop().unwrap_or_default();

        self.report("Combining ranking signals");
        let mut fused: Vec<ScoredChunk> = keyword
            .into_iter()
            .zip(keyword_norm)
            .zip(vectors)
            .map(|((scored, kw), vector)| {
                let similarity = cosine(&vector, &query_vec);
                let mut importance = self
                    .file_scores
                    .get(&scored.chunk.rel_path)
                    .copied()
                    .unwrap_or(0.5);
                if matches!(scored.chunk.lang.as_str(), "markdown" | "mdx") {
                    importance *= MARKDOWN_IMPORTANCE_FACTOR;
                }
                let score = KEYWORD_WEIGHT * kw
                    + EMBEDDING_WEIGHT * similarity
                    + IMPORTANCE_WEIGHT * importance;
                ScoredChunk { chunk: scored.chunk, score }
            })
            .collect();
        fused.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(fused)
    }
}

/// Linear rescale of keyword scores into [0, 1]; a flat field maps to 0.5.
fn normalize(scored: &[ScoredChunk]) -> Vec<f64> {
    let min = scored.iter().map(|s| s.score).fold(f64::INFINITY, f64::min);
    let max = scored.iter().map(|s| s.score).fold(f64::NEG_INFINITY, f64::max);
    if scored.is_empty() {
        return Vec::new();
    }
    if (max - min).abs() < f64::EPSILON {
        return vec![0.5; scored.len()];
    }
    scored
        .iter()
        .map(|s| (s.score - min) / (max - min))
        .collect()
}

/// What actually gets embedded for a chunk: path and construct header plus
/// the (truncated) body, so the vector carries location context too.
fn enrich_for_embedding(chunk: &Chunk) -> String {
    let content = truncate_chars(&chunk.content, EMBED_CONTENT_CHARS);
    format!(
        "File: {}\n{}: {}\n{}",
        chunk.rel_path,
        chunk.kind.as_str(),
        chunk.name.as_deref().unwrap_or(""),
        content
    )
}

fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += *x as f64 * *y as f64;
        na += *x as f64 * *x as f64;
        nb += *y as f64 * *y as f64;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

/* ----------------------------------- tests ----------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkKind;
    use anyhow::bail;

    fn chunk(rel: &str, lang: &str, content: &str) -> Chunk {
        Chunk {
            id: Chunk::stable_id(rel, 1),
            path: format!("/repo/{rel}"),
            rel_path: rel.to_string(),
            content: content.to_string(),
            start_line: 1,
            end_line: 1,
            kind: ChunkKind::Function,
            name: None,
            lang: lang.to_string(),
            tokens: 10,
        }
    }

    /// Axis-embeds: anything mentioning "login" lands on x, the rest on y.
    struct AxisProvider;
    impl EmbeddingProvider for AxisProvider {
        fn dimension(&self) -> usize {
            2
        }
        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    if t.contains("login") {
                        vec![1.0, 0.0]
                    } else {
                        vec![0.0, 1.0]
                    }
                })
                .collect())
        }
    }

    struct LoginGen;
    impl TextGenerator for LoginGen {
        fn generate(&self, _prompt: &str, _max: usize) -> Result<String> {
            Ok("def login(user): return session(user)".to_string())
        }
    }

    struct DownGen;
    impl TextGenerator for DownGen {
        fn generate(&self, _prompt: &str, _max: usize) -> Result<String> {
            bail!("provider offline")
        }
    }

    #[test]
    fn similarity_to_hypothetical_answer_drives_ranking() {
        let embedder = Embedder::new(AxisProvider, None);
        let file_scores = HashMap::new();
        let ranker = HybridRanker::new(&embedder, &LoginGen, &file_scores, None);

        // Keyword-neutral query: neither chunk mentions "session handling"
        // so ordering comes from the embedding side.
        let chunks = vec![
            chunk("src/metrics.py", "python", "def emit(): pass"),
            chunk("src/auth.py", "python", "def login(user): pass"),
        ];
        let ranked = ranker.rank(chunks, "session handling").unwrap();
        assert_eq!(ranked[0].chunk.rel_path, "src/auth.py");
    }

    #[test]
    fn generator_failure_degrades_to_raw_query() {
        let embedder = Embedder::new(AxisProvider, None);
        let file_scores = HashMap::new();
        let ranker = HybridRanker::new(&embedder, &DownGen, &file_scores, None);

        // Raw query mentions login, so the hyde fallback still lands on x.
        let chunks = vec![
            chunk("src/metrics.py", "python", "def emit(): pass"),
            chunk("src/auth.py", "python", "def login(user): pass"),
        ];
        let ranked = ranker.rank(chunks, "where is login handled").unwrap();
        assert_eq!(ranked[0].chunk.rel_path, "src/auth.py");
    }

    #[test]
    fn markdown_importance_is_discounted() {
        let embedder = Embedder::new(AxisProvider, None);
        let mut file_scores = HashMap::new();
        file_scores.insert("notes.md".to_string(), 1.0);
        file_scores.insert("src/emit.py".to_string(), 1.0);
        let ranker = HybridRanker::new(&embedder, &DownGen, &file_scores, None);

        // Same keyword score (none), same embedding side (both on y axis,
        // query on y too... use a query with no login so hyde=query on y).
        let chunks = vec![
            chunk("notes.md", "markdown", "some notes"),
            chunk("src/emit.py", "python", "def emit(): pass"),
        ];
        let ranked = ranker.rank(chunks, "unrelated thing").unwrap();
        assert_eq!(ranked[0].chunk.rel_path, "src/emit.py");
        assert!(ranked[0].score > ranked[1].score);
    }

    #[test]
    fn flat_keyword_scores_normalize_to_half() {
        let scored = vec![
            ScoredChunk { chunk: chunk("a.py", "python", "x"), score: 3.0 },
            ScoredChunk { chunk: chunk("b.py", "python", "x"), score: 3.0 },
        ];
        assert_eq!(normalize(&scored), vec![0.5, 0.5]);

        let varied = vec![
            ScoredChunk { chunk: chunk("a.py", "python", "x"), score: 1.0 },
            ScoredChunk { chunk: chunk("b.py", "python", "x"), score: 3.0 },
        ];
        assert_eq!(normalize(&varied), vec![0.0, 1.0]);
    }

    #[test]
    fn cosine_basics() {
        assert!((cosine(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine(&[1.0], &[1.0, 0.0]), 0.0);
    }
}
