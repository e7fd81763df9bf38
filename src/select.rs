// lmfetch/src/select.rs

use crate::chunk::ScoredChunk;

/// Per-chunk cost padding for headers the formatter will add.
pub const CHUNK_OVERHEAD_TOKENS: usize = 50;
/// Fraction of the caller's budget actually spent on chunks.
const BUDGET_HEADROOM: f64 = 0.95;
/// Stop scanning once the pack is this full.
const FILL_STOP: f64 = 0.98;

pub struct Selection {
    /// Kept in score order (descending, ties by insertion).
    pub chunks: Vec<ScoredChunk>,
    /// Tokens spent, including per-chunk overhead.
    pub tokens: usize,
}

/// Greedy pack by descending score. Greedy is as good as it gets here: costs
/// are near-uniform and the score is the value signal, so there is nothing a
/// knapsack solver would win back that's worth its runtime.
pub fn select(ranked: Vec<ScoredChunk>, budget: usize) -> Selection {
    let effective = (budget as f64 * BUDGET_HEADROOM).floor() as usize;
    let stop_at = (effective as f64 * FILL_STOP) as usize;

    let mut chunks = Vec::new();
    let mut used = 0usize;
    for candidate in ranked {
        if used >= stop_at {
            break;
        }
        let cost = candidate.chunk.tokens + CHUNK_OVERHEAD_TOKENS;
        if used + cost <= effective {
            used += cost;
            chunks.push(candidate);
        }
    }
    Selection { chunks, tokens: used }
}

/* ----------------------------------- tests ----------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{Chunk, ChunkKind};

    fn scored(rel: &str, tokens: usize, score: f64) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                id: Chunk::stable_id(rel, 1),
                path: format!("/repo/{rel}"),
                rel_path: rel.to_string(),
                content: "x".to_string(),
                start_line: 1,
                end_line: 1,
                kind: ChunkKind::Section,
                name: None,
                lang: "text".to_string(),
                tokens,
            },
            score,
        }
    }

    #[test]
    fn budget_clamp_packs_exactly_two_large_chunks() {
        let ranked: Vec<ScoredChunk> = (0..10)
            .map(|i| scored(&format!("f{i}.txt"), 10_000, 10.0 - i as f64))
            .collect();
        let sel = select(ranked, 25_000);
        // effective = 23750; two chunks cost 2 × 10050 = 20100 ≤ 23750,
        // a third would overflow.
        assert_eq!(sel.chunks.len(), 2);
        assert_eq!(sel.tokens, 20_100);
        assert!(sel.tokens <= 23_750);
    }

    #[test]
    fn budget_is_never_exceeded() {
        let ranked: Vec<ScoredChunk> = (0..50)
            .map(|i| scored(&format!("f{i}.txt"), 377, 50.0 - i as f64))
            .collect();
        let budget = 5_000;
        let sel = select(ranked, budget);
        let effective = (budget as f64 * 0.95).floor() as usize;
        assert!(sel.tokens <= effective);
        let recomputed: usize = sel
            .chunks
            .iter()
            .map(|s| s.chunk.tokens + CHUNK_OVERHEAD_TOKENS)
            .sum();
        assert_eq!(recomputed, sel.tokens);
    }

    #[test]
    fn smaller_chunks_fill_gaps_left_by_big_ones() {
        let ranked = vec![
            scored("big.txt", 900, 3.0),
            scored("huge.txt", 5_000, 2.0), // skipped, does not fit
            scored("small.txt", 10, 1.0),   // still packed
        ];
        let sel = select(ranked, 1_100);
        let picked: Vec<&str> = sel.chunks.iter().map(|s| s.chunk.rel_path.as_str()).collect();
        assert_eq!(picked, vec!["big.txt", "small.txt"]);
    }

    #[test]
    fn stops_once_nearly_full() {
        // effective = 9500, stop threshold = 9310. The first chunk costs
        // 9400, landing past the threshold; the second would still fit
        // (9400 + 51 ≤ 9500) but must not be considered.
        let ranked = vec![
            scored("a.txt", 9_350, 2.0),
            scored("b.txt", 1, 1.0),
        ];
        let sel = select(ranked, 10_000);
        assert_eq!(sel.chunks.len(), 1);
        assert_eq!(sel.chunks[0].chunk.rel_path, "a.txt");
    }

    #[test]
    fn empty_input_empty_selection() {
        let sel = select(Vec::new(), 1_000);
        assert!(sel.chunks.is_empty());
        assert_eq!(sel.tokens, 0);
    }
}
