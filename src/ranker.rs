// lmfetch/src/ranker.rs

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use crate::chunk::{
    Chunk,
    ScoredChunk
};

/// Scores chunks against a query. Two realizations: keyword-only (fast,
/// deterministic) and hybrid (keyword + embeddings + file importance).
pub trait Ranker {
    fn rank(&self, chunks: Vec<Chunk>, query: &str) -> Result<Vec<ScoredChunk>>;
}

/// Multiplier for terms the query singles out (`.execute`, quoted strings).
const IMPORTANT_BOOST: f64 = 5.0;

/// English stopwords plus query words that carry no retrieval signal.
const STOPWORDS: &[&str] = &[
    // english
    "a", "an", "and", "are", "as", "at", "be", "been", "being", "but", "by",
    "can", "could", "did", "do", "does", "doing", "for", "from", "had", "has",
    "have", "how", "i", "if", "in", "into", "is", "it", "its", "may", "me",
    "might", "must", "my", "no", "nor", "not", "of", "on", "or", "our",
    "over", "shall", "should", "so", "some", "such", "than", "that", "the",
    "their", "them", "then", "there", "these", "they", "this", "those", "to",
    "too", "under", "up", "very", "was", "we", "were", "what", "when",
    "where", "which", "who", "why", "will", "with", "would", "you", "your",
    // domain-generic
    "function", "functions", "class", "classes", "method", "methods",
    "file", "files", "code", "codebase", "project", "repo", "repository",
    "module", "modules", "line", "lines",
    "explain", "show", "find", "tell", "describe", "list",
    "use", "used", "using", "work", "works", "working", "written", "write",
    "mean", "means", "implement", "implementation", "implemented",
];

static DOT_TERM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.([A-Za-z_]\w*)").expect("dot-term pattern"));
static QUOTED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""([^"]+)"|'([^']+)'"#).expect("quoted pattern"));
static NON_WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("split pattern"));

/// Keyword-only ranking: pure function of (chunks, query), no clock, no
/// randomness, no network.
pub struct KeywordRanker;

impl Ranker for KeywordRanker {
    fn rank(&self, chunks: Vec<Chunk>, query: &str) -> Result<Vec<ScoredChunk>> {
        Ok(rank_keyword(chunks, query))
    }
}

pub fn rank_keyword(chunks: Vec<Chunk>, query: &str) -> Vec<ScoredChunk> {
    let prepared = prepare_query(query);
    let mut scored: Vec<ScoredChunk> = chunks
        .into_iter()
        .map(|chunk| {
            let score = if prepared.tokens.is_empty() {
                0.0
            } else {
                score_chunk(&chunk, &prepared)
            };
            ScoredChunk { chunk, score }
        })
        .collect();
    // Stable sort: ties keep insertion order, which keeps fast runs
    // reproducible end to end.
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored
}

/* ------------------------------ query prep ------------------------------ */

pub struct PreparedQuery {
    pub tokens: Vec<String>,
    pub important: HashSet<String>,
}

pub fn prepare_query(query: &str) -> PreparedQuery {
    let mut important = HashSet::new();
    for caps in DOT_TERM_RE.captures_iter(query) {
        for tok in tokenize(&caps[1]) {
            important.insert(tok);
        }
    }
    for caps in QUOTED_RE.captures_iter(query) {
        let inner = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str()).unwrap_or("");
        for tok in tokenize(inner) {
            important.insert(tok);
        }
    }
    PreparedQuery {
        tokens: tokenize(query),
        important,
    }
}

/// camelCase split → underscores/dashes to spaces → lowercase → word split →
/// drop short tokens and stopwords → stem.
pub fn tokenize(text: &str) -> Vec<String> {
    let decamel = split_camel(text);
    let lowered = decamel.replace(['_', '-'], " ").to_lowercase();
    NON_WORD_RE
        .split(&lowered)
        .filter(|t| t.len() > 1)
        .filter(|t| !STOPWORDS.contains(t))
        .map(stem)
        .collect()
}

fn split_camel(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut prev_lower = false;
    for ch in text.chars() {
        if ch.is_uppercase() && prev_lower {
            out.push(' ');
        }
        prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        out.push(ch);
    }
    out
}

/// Greedy suffix rewrite; a rule that would leave fewer than 3 chars is
/// skipped in favor of the next. Words under 4 chars pass through.
pub fn stem(word: &str) -> String {
    const RULES: &[(&str, &str)] = &[
        ("tion", "t"),
        ("sion", "s"),
        ("ies", "y"),
        ("ied", "y"),
        ("ation", ""),
        ("ement", ""),
        ("ment", ""),
        ("ing", ""),
        ("ed", ""),
        ("es", ""),
        ("er", ""),
        ("ly", ""),
        ("e", ""),
        ("s", ""),
    ];
    if word.len() < 4 {
        return word.to_string();
    }
    for (suffix, replacement) in RULES {
        if let Some(prefix) = word.strip_suffix(suffix) {
            let candidate = format!("{prefix}{replacement}");
            if candidate.len() >= 3 {
                return candidate;
            }
        }
    }
    word.to_string()
}

/* -------------------------------- scoring -------------------------------- */

fn score_chunk(chunk: &Chunk, query: &PreparedQuery) -> f64 {
    let content_tokens = tokenize(&chunk.content);
    let path_tokens = tokenize(&chunk.rel_path);
    let name_tokens = chunk
        .name
        .as_deref()
        .map(tokenize)
        .unwrap_or_default();

    let density = (200.0 / content_tokens.len().max(1) as f64).min(1.0);

    let mut total = 0.0;
    let mut all_matched = true;
    for q in &query.tokens {
        let boost = if query.important.contains(q) { IMPORTANT_BOOST } else { 1.0 };

        let content_matches = count_matches(&content_tokens, q);
        let path_matches = count_matches(&path_tokens, q);
        let name_matches = count_matches(&name_tokens, q);

        if content_matches > 0 {
            total += (1.0 + (content_matches as f64).ln()) * (1.0 + density) * boost;
        }
        total += path_matches as f64 * 2.0 * boost;
        total += name_matches as f64 * 3.0 * boost;

        if content_tokens.iter().any(|t| t == q) {
            total += 2.0 * boost;
        }
        if path_tokens.iter().any(|t| t == q) {
            total += 10.0 * boost;
        }
        if name_tokens.iter().any(|t| t == q) {
            total += 20.0 * boost;
        }

        if content_matches == 0 && path_matches == 0 && name_matches == 0 {
            all_matched = false;
        }
    }

    if query.tokens.len() >= 2 && all_matched {
        total *= 1.5;
    }

    let path = &chunk.rel_path;
    if [".test.", ".spec.", "__fixtures__", "__tests__"]
        .iter()
        .any(|m| path.contains(m))
    {
        total *= 0.5;
    }
    if path.contains("/codemod/") || path.contains("/codemods/") {
        total *= 0.3;
    }
    if path.contains("prepare") && !query.tokens.iter().any(|q| q == "prepar") {
        total *= 0.7;
    }

    total
}

fn count_matches(tokens: &[String], q: &str) -> usize {
    tokens
        .iter()
        .filter(|t| t.contains(q) || q.contains(t.as_str()))
        .count()
}

/* ----------------------------------- tests ----------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkKind;

    fn chunk(rel: &str, name: Option<&str>, lang: &str, content: &str) -> Chunk {
        Chunk {
            id: Chunk::stable_id(rel, 1),
            path: format!("/repo/{rel}"),
            rel_path: rel.to_string(),
            content: content.to_string(),
            start_line: 1,
            end_line: content.lines().count().max(1),
            kind: ChunkKind::Function,
            name: name.map(|s| s.to_string()),
            lang: lang.to_string(),
            tokens: 10,
        }
    }

    #[test]
    fn stemmer_table() {
        assert_eq!(stem("creation"), "creat");
        assert_eq!(stem("expression"), "expres");
        assert_eq!(stem("flies"), "fly");
        assert_eq!(stem("tried"), "try");
        assert_eq!(stem("statement"), "stat");
        assert_eq!(stem("running"), "runn");
        assert_eq!(stem("tested"), "test");
        assert_eq!(stem("classes"), "class");
        assert_eq!(stem("parser"), "pars");
        assert_eq!(stem("quickly"), "quick");
        assert_eq!(stem("execute"), "execut");
        assert_eq!(stem("prepare"), "prepar");
        // Too short to stem at all.
        assert_eq!(stem("cat"), "cat");
        // First rule would leave < 3 chars; later rule applies instead.
        assert_eq!(stem("ties"), "tie");
    }

    #[test]
    fn tokenizer_splits_camel_and_snake() {
        assert_eq!(tokenize("parseHttpRequest"), vec!["pars", "http", "request"]);
        assert_eq!(tokenize("read_file_sync"), vec!["read", "sync"]);
        assert_eq!(tokenize("a b the function"), Vec::<String>::new());
    }

    #[test]
    fn important_terms_from_dots_and_quotes() {
        let q = prepare_query("explain the .execute method and 'tokenBudget'");
        assert!(q.important.contains("execut"));
        assert!(q.important.contains("token"));
        assert!(q.important.contains("budget"));
        assert!(q.tokens.contains(&"execut".to_string()));
    }

    #[test]
    fn stopword_only_query_scores_everything_zero() {
        let chunks = vec![
            chunk("src/a.py", Some("login"), "python", "def login(user):\n    pass"),
            chunk("src/b.py", None, "python", "x = 1"),
        ];
        let ranked = rank_keyword(chunks, "how does the code work");
        assert!(ranked.iter().all(|s| s.score == 0.0));
        // Insertion order preserved on all-zero scores.
        assert_eq!(ranked[0].chunk.rel_path, "src/a.py");
    }

    #[test]
    fn exact_name_hit_outranks_unrelated_code() {
        let chunks = vec![
            chunk("src/util.py", Some("shuffle"), "python", "def shuffle(xs):\n    return xs"),
            chunk("src/auth.py", Some("login"), "python", "def login(user):\n    return user"),
        ];
        let ranked = rank_keyword(chunks, "login");
        assert_eq!(ranked[0].chunk.rel_path, "src/auth.py");
        assert!(ranked[0].score > ranked[1].score);
    }

    #[test]
    fn important_term_prefers_named_symbol_over_mentions() {
        let mentions = "execute execute execute execute execute execute execute execute";
        let chunks = vec![
            chunk("docs.md", None, "markdown", mentions),
            chunk("src/runner.ts", Some("execute"), "typescript", "async execute(task) { return run(task); }"),
        ];
        let ranked = rank_keyword(chunks, "explain .execute method");
        assert_eq!(ranked[0].chunk.rel_path, "src/runner.ts");
    }

    #[test]
    fn full_coverage_multiplier_rewards_complete_queries() {
        let both = chunk(
            "src/parser.ts",
            Some("parseToken"),
            "typescript",
            "function parseToken(input) { return token(input); }",
        );
        let partial = chunk(
            "src/lexer.ts",
            None,
            "typescript",
            "function lex(input) { return input; }",
        );
        let ranked = rank_keyword(vec![partial, both], "parse token");
        assert_eq!(ranked[0].chunk.rel_path, "src/parser.ts");
        assert!(ranked[1].score < ranked[0].score);
    }

    #[test]
    fn density_rewards_compact_chunks() {
        let short = chunk("src/a.py", None, "python", "login here");
        let padding = "filler words about nothing in particular\n".repeat(200);
        let long = chunk("src/b.py", None, "python", &format!("login here\n{padding}"));
        let ranked = rank_keyword(vec![long, short], "login");
        assert_eq!(ranked[0].chunk.rel_path, "src/a.py");
    }

    #[test]
    fn substring_matching_is_bidirectional() {
        // Query token inside a longer content token, and the reverse.
        let a = chunk("src/a.py", None, "python", "def authentication_check(): pass");
        let ranked = rank_keyword(vec![a], "auth");
        assert!(ranked[0].score > 0.0);

        let b = chunk("src/b.py", None, "python", "auth = 1");
        let ranked = rank_keyword(vec![b], "authentication");
        assert!(ranked[0].score > 0.0);
    }

    #[test]
    fn camel_case_query_matches_snake_case_code() {
        let snake = chunk("src/cfg.py", None, "python", "def parse_config(path):\n    return path");
        let other = chunk("src/run.py", None, "python", "def run(): pass");
        let ranked = rank_keyword(vec![other, snake], "parseConfig");
        assert_eq!(ranked[0].chunk.rel_path, "src/cfg.py");
    }

    #[test]
    fn test_paths_are_halved() {
        let plain = chunk("src/auth.py", Some("login"), "python", "def login(u):\n    pass");
        let mut test = chunk("src/auth.test.py", Some("login"), "python", "def login(u):\n    pass");
        test.rel_path = "src/auth.test.py".to_string();
        let ranked = rank_keyword(vec![test, plain], "login");
        assert_eq!(ranked[0].chunk.rel_path, "src/auth.py");
    }

    #[test]
    fn codemod_and_prepare_penalties() {
        let a = chunk("src/codemods/fix.ts", Some("rename"), "typescript", "rename things");
        let b = chunk("src/refactor.ts", Some("rename"), "typescript", "rename things");
        let ranked = rank_keyword(vec![a, b], "rename");
        assert_eq!(ranked[0].chunk.rel_path, "src/refactor.ts");

        let c = chunk("src/prepare.ts", Some("rename"), "typescript", "rename things");
        let d = chunk("src/other.ts", Some("rename"), "typescript", "rename things");
        let ranked = rank_keyword(vec![c, d], "rename");
        assert_eq!(ranked[0].chunk.rel_path, "src/other.ts");

        // Asking for prepare itself lifts the penalty.
        let e = chunk("src/prepare.ts", Some("prepare"), "typescript", "function prepare() {}");
        let ranked = rank_keyword(vec![e], "prepare");
        assert!(ranked[0].score > 0.0);
    }
}
