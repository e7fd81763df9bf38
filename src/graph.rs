// lmfetch/src/graph.rs

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{
    HashMap,
    HashSet
};
use crate::source::SourceFile;

const DAMPING: f64 = 0.85;
const ITERATIONS: usize = 10;

/// Forward and inverse import maps over relative paths. Every entry refers
/// to a discovered file; external modules never make it in.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    pub imports: HashMap<String, Vec<String>>,
    pub imported_by: HashMap<String, Vec<String>>,
}

/// Regex-scan every file for import statements and resolve the relative ones
/// against the importing file's directory.
pub fn build_graph(files: &[SourceFile]) -> DependencyGraph {
    let known: HashSet<&str> = files.iter().map(|f| f.rel_path.as_str()).collect();

    let mut graph = DependencyGraph::default();
    for f in files {
        graph.imports.entry(f.rel_path.clone()).or_default();
        graph.imported_by.entry(f.rel_path.clone()).or_default();
    }

    for f in files {
        let mut resolved: Vec<String> = Vec::new();
        for spec in scan_imports(f) {
            if let Some(target) = resolve(&spec, f, &known) {
                if target != f.rel_path && !resolved.contains(&target) {
                    resolved.push(target);
                }
            }
        }
        for target in &resolved {
            graph
                .imported_by
                .entry(target.clone())
                .or_default()
                .push(f.rel_path.clone());
        }
        graph.imports.insert(f.rel_path.clone(), resolved);
    }
    graph
}

/// Simplified PageRank over the import graph, normalized to [0, 1] by the
/// maximum. Converges fine on cycles; no cycle detection wanted or needed.
pub fn centrality(graph: &DependencyGraph) -> HashMap<String, f64> {
    let paths: Vec<&String> = graph.imports.keys().collect();
    if paths.is_empty() {
        return HashMap::new();
    }

    let mut scores: HashMap<&str, f64> =
        paths.iter().map(|p| (p.as_str(), 1.0)).collect();

    for _ in 0..ITERATIONS {
        let mut next: HashMap<&str, f64> = HashMap::with_capacity(scores.len());
        for p in &paths {
            let incoming = graph
                .imported_by
                .get(p.as_str())
                .map(|v| v.as_slice())
                .unwrap_or(&[]);
            let mut sum = 0.0;
            for q in incoming {
                let out_degree = graph
                    .imports
                    .get(q)
                    .map(|v| v.len())
                    .unwrap_or(0);
                if out_degree > 0 {
                    sum += scores.get(q.as_str()).copied().unwrap_or(1.0) / out_degree as f64;
                }
            }
            next.insert(p.as_str(), (1.0 - DAMPING) + DAMPING * sum);
        }
        scores = next;
    }

    let max = scores.values().cloned().fold(0.0_f64, f64::max);
    let denom = if max > 0.0 { max } else { 1.0 };
    scores
        .into_iter()
        .map(|(p, s)| (p.to_string(), s / denom))
        .collect()
}

/* ----------------------------- import scanning ----------------------------- */

struct ImportPattern {
    langs: &'static [&'static str],
    res: Vec<Regex>,
}

static IMPORT_PATTERNS: Lazy<Vec<ImportPattern>> = Lazy::new(|| {
    let re = |s: &str| Regex::new(s).expect("import pattern");
    vec![
        ImportPattern {
            langs: &["python"],
            res: vec![
                re(r"^\s*from\s+(?P<m>[.\w]+)\s+import\b"),
                re(r"^\s*import\s+(?P<m>[.\w]+)"),
            ],
        },
        ImportPattern {
            langs: &["javascript", "javascriptreact", "typescript", "typescriptreact"],
            res: vec![
                re(r#"import\s+[^'"]*?from\s+['"](?P<m>[^'"]+)['"]"#),
                re(r#"^\s*import\s+['"](?P<m>[^'"]+)['"]"#),
                re(r#"import\s*\(\s*['"](?P<m>[^'"]+)['"]"#),
                re(r#"require\s*\(\s*['"](?P<m>[^'"]+)['"]"#),
                re(r#"export\s+[^'"]*?from\s+['"](?P<m>[^'"]+)['"]"#),
            ],
        },
        ImportPattern {
            langs: &["go"],
            res: vec![re(r#"import\s+(?:\w+\s+)?"(?P<m>[^"]+)""#)],
        },
        ImportPattern {
            langs: &["rust"],
            res: vec![
                re(r"^\s*(?:pub(?:\([^)]*\))?\s+)?use\s+(?P<m>[\w:]+)"),
                re(r"^\s*(?:pub(?:\([^)]*\))?\s+)?mod\s+(?P<m>\w+)\s*;"),
            ],
        },
        ImportPattern {
            langs: &["ruby"],
            res: vec![re(r#"^\s*require(?:_relative)?\s+['"](?P<m>[^'"]+)['"]"#)],
        },
    ]
});

fn scan_imports(file: &SourceFile) -> Vec<String> {
    let Some(set) = IMPORT_PATTERNS.iter().find(|p| p.langs.contains(&file.lang.as_str())) else {
        return Vec::new();
    };
    let mut specs = Vec::new();
    for line in file.content.lines() {
        for re in &set.res {
            if let Some(caps) = re.captures(line) {
                let mut spec = caps["m"].to_string();
                let trimmed = line.trim_start();
                // `mod x;` declares a child module; route it through self::.
                if file.lang == "rust" && trimmed.contains("mod ") && !spec.contains("::") {
                    spec = format!("self::{spec}");
                }
                // `require_relative 'x'` is relative even without a ./ prefix.
                if file.lang == "ruby"
                    && trimmed.starts_with("require_relative")
                    && !spec.starts_with('.')
                {
                    spec = format!("./{spec}");
                }
                specs.push(spec);
                break;
            }
        }
    }
    specs
}

/* ------------------------------- resolution ------------------------------- */

/// Resolve a relative module reference to a discovered file. External
/// references (bare package names, absolute paths) return None.
fn resolve(spec: &str, from: &SourceFile, known: &HashSet<&str>) -> Option<String> {
    let dir = parent_dir(&from.rel_path);
    match from.lang.as_str() {
        "python" => resolve_python(spec, &dir, known),
        "javascript" | "javascriptreact" | "typescript" | "typescriptreact" => {
            resolve_ecmascript(spec, &dir, known)
        }
        "go" => resolve_pathlike(spec, &dir, known, &["go"]),
        "rust" => resolve_rust(spec, from, known),
        "ruby" => resolve_pathlike(spec, &dir, known, &["rb"]),
        _ => None,
    }
}

fn resolve_python(spec: &str, dir: &str, known: &HashSet<&str>) -> Option<String> {
    // Only dot-relative imports are local by construction.
    let dots = spec.chars().take_while(|&c| c == '.').count();
    if dots == 0 {
        return None;
    }
    let rest = &spec[dots..];
    let mut base = dir.to_string();
    for _ in 1..dots {
        base = parent_dir(&base);
    }
    let tail = rest.replace('.', "/");
    let joined = join_norm(&base, &tail);
    for candidate in [
        format!("{joined}.py"),
        join_norm(&joined, "__init__.py"),
    ] {
        if known.contains(candidate.as_str()) {
            return Some(candidate);
        }
    }
    // `from .mod import name`: the last segment may be a symbol, not a module.
    let trimmed = parent_dir(&joined);
    if !trimmed.is_empty() {
        let candidate = format!("{trimmed}.py");
        if known.contains(candidate.as_str()) {
            return Some(candidate);
        }
    }
    None
}

fn resolve_ecmascript(spec: &str, dir: &str, known: &HashSet<&str>) -> Option<String> {
    if !spec.starts_with("./") && !spec.starts_with("../") {
        return None;
    }
    let joined = join_norm(dir, spec);
    if known.contains(joined.as_str()) {
        return Some(joined);
    }
    const EXTS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs"];
    for ext in EXTS {
        let candidate = format!("{joined}.{ext}");
        if known.contains(candidate.as_str()) {
            return Some(candidate);
        }
    }
    for ext in EXTS {
        let candidate = join_norm(&joined, &format!("index.{ext}"));
        if known.contains(candidate.as_str()) {
            return Some(candidate);
        }
    }
    None
}

fn resolve_pathlike(spec: &str, dir: &str, known: &HashSet<&str>, exts: &[&str]) -> Option<String> {
    if !spec.starts_with("./") && !spec.starts_with("../") {
        return None;
    }
    let joined = join_norm(dir, spec);
    if known.contains(joined.as_str()) {
        return Some(joined);
    }
    for ext in exts {
        let candidate = format!("{joined}.{ext}");
        if known.contains(candidate.as_str()) {
            return Some(candidate);
        }
    }
    None
}

fn resolve_rust(spec: &str, from: &SourceFile, known: &HashSet<&str>) -> Option<String> {
    let dir = parent_dir(&from.rel_path);
    let file_name = from.rel_path.rsplit('/').next().unwrap_or("");
    let is_root_file = matches!(file_name, "mod.rs" | "lib.rs" | "main.rs");

    // Module hierarchy, not the directory tree: for x/y.rs, children live in
    // x/y/ and siblings (super::) in x/; for mod.rs-style roots both shift up.
    let self_base = if is_root_file {
        dir.clone()
    } else {
        join_norm(&dir, file_name.trim_end_matches(".rs"))
    };
    let super_base = if is_root_file { parent_dir(&dir) } else { dir };

    let (base, rest) = if let Some(r) = spec.strip_prefix("crate::") {
        (src_root(&from.rel_path), r)
    } else if let Some(r) = spec.strip_prefix("self::") {
        (self_base, r)
    } else if let Some(r) = spec.strip_prefix("super::") {
        let mut b = super_base;
        let mut r = r;
        while let Some(more) = r.strip_prefix("super::") {
            b = parent_dir(&b);
            r = more;
        }
        (b, r)
    } else {
        return None; // bare paths are external crates
    };

    let segs: Vec<&str> = rest.split("::").filter(|s| !s.is_empty()).collect();
    if segs.is_empty() {
        return None;
    }
    // Deepest module file first: a::b::item may live in a/b.rs, a/b/mod.rs,
    // or a.rs (item defined inline).
    for depth in (1..=segs.len()).rev() {
        let module_path = join_norm(&base, &segs[..depth].join("/"));
        for candidate in [format!("{module_path}.rs"), join_norm(&module_path, "mod.rs")] {
            if known.contains(candidate.as_str()) {
                return Some(candidate);
            }
        }
    }
    None
}

/* ----------------------------- path arithmetic ----------------------------- */

fn parent_dir(rel: &str) -> String {
    match rel.rsplit_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => String::new(),
    }
}

/// Nearest `src` ancestor segment, for `crate::` paths; the file's own
/// directory when the repo doesn't use one.
fn src_root(rel: &str) -> String {
    let mut prefix = String::new();
    for seg in rel.split('/') {
        if seg == "src" {
            return if prefix.is_empty() { "src".to_string() } else { format!("{prefix}/src") };
        }
        if !prefix.is_empty() {
            prefix.push('/');
        }
        prefix.push_str(seg);
    }
    parent_dir(rel)
}

/// Join and collapse `.` / `..` on forward-slash paths.
fn join_norm(base: &str, rel: &str) -> String {
    let mut stack: Vec<&str> = if base.is_empty() {
        Vec::new()
    } else {
        base.split('/').collect()
    };
    for seg in rel.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            s => stack.push(s),
        }
    }
    stack.join("/")
}

/* ----------------------------------- tests ----------------------------------- */
