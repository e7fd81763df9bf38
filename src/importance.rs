// lmfetch/src/importance.rs

use std::collections::{
    HashMap,
    HashSet
};
use crate::{
    source::SourceFile,
    util
};

/// Basename stems that usually mark an entry point.
const ENTRY_STEMS: &[&str] = &["index", "main", "cli", "app", "server"];

/// Exact basenames that mark an entry point or manifest.
const ENTRY_NAMES: &[&str] = &[
    "__init__.py", "mod.rs", "lib.rs",
    "package.json", "Cargo.toml", "pyproject.toml", "go.mod",
    "setup.py", "Gemfile", "composer.json", "build.gradle", "pom.xml",
];

const BOOST_DIRS: &[&str] = &[
    "src", "lib", "core", "api", "routes", "controllers", "services",
    "models", "components", "hooks", "utils", "helpers",
];

const PENALTY_DIRS: &[&str] = &[
    "test", "tests", "__tests__", "spec", "specs", "e2e", "fixtures",
    "mocks", "stubs", "examples", "docs", "scripts", "tools", "config",
    "configs",
];

/// Static, query-independent prior per file, in [0, 1].
pub fn importance_map(files: &[SourceFile]) -> HashMap<String, f64> {
    files
        .iter()
        .map(|f| (f.rel_path.clone(), file_importance(&f.rel_path, &f.lang)))
        .collect()
}

pub fn file_importance(rel_path: &str, lang: &str) -> f64 {
    let mut score = 0.5;

    let basename = rel_path.rsplit('/').next().unwrap_or(rel_path);
    let stem = basename.split('.').next().unwrap_or(basename);
    if ENTRY_NAMES.contains(&basename) || ENTRY_STEMS.contains(&stem) {
        score += 0.3;
    }

    let dirs: HashSet<&str> = rel_path
        .split('/')
        .rev()
        .skip(1) // drop the basename
        .collect();
    if BOOST_DIRS.iter().any(|d| dirs.contains(d)) {
        score += 0.1;
    }
    if PENALTY_DIRS.iter().any(|d| dirs.contains(d)) {
        score -= 0.2;
    }
    if matches_test_pattern(rel_path) {
        score -= 0.15;
    }

    let depth = util::dir_depth(rel_path);
    if depth > 3 {
        score -= 0.05 * (depth as f64 - 3.0);
    }
    if depth == 0 {
        score += 0.1;
    }

    match lang {
        "markdown" | "mdx" => score -= 0.1,
        "json" | "yaml" => score -= 0.05,
        _ => {}
    }

    score.clamp(0.0, 1.0)
}

/// `*.test.*`, `*.spec.*`, `*_test.*`, `*_spec.*`, `*.d.ts`, `*.config.*`,
/// `*.mock.*`. One penalty regardless of how many match.
fn matches_test_pattern(rel_path: &str) -> bool {
    let basename = rel_path.rsplit('/').next().unwrap_or(rel_path);
    if basename.ends_with(".d.ts") {
        return true;
    }
    for marker in [".test.", ".spec.", "_test.", "_spec.", ".config.", ".mock."] {
        if basename.contains(marker) {
            return true;
        }
    }
    false
}

/// 0.6·prior + 0.4·centrality over the union of keyed paths; a side missing
/// a path contributes the neutral 0.5.
pub fn combined_scores(
    importance: &HashMap<String, f64>,
    centrality: &HashMap<String, f64>,
) -> HashMap<String, f64> {
    let mut out = HashMap::with_capacity(importance.len().max(centrality.len()));
    for path in importance.keys().chain(centrality.keys()) {
        if out.contains_key(path) {
            continue;
        }
        let imp = importance.get(path).copied().unwrap_or(0.5);
        let cen = centrality.get(path).copied().unwrap_or(0.5);
        out.insert(path.clone(), 0.6 * imp + 0.4 * cen);
    }
    out
}

/* ----------------------------------- tests ----------------------------------- */
