// lmfetch/src/chunker.rs

use once_cell::sync::Lazy;
use regex::Regex;
use crate::{
    chunk::{
        Chunk,
        ChunkKind
    },
    source::SourceFile,
    tokens,
};

/// Candidates shorter than this are dropped (unless the file has a single
/// boundary; a one-function file is still worth keeping whole).
pub const MIN_LINES: usize = 10;
/// Candidates longer than this are sliced into consecutive pieces.
pub const MAX_LINES: usize = 200;

/// A line index at which a new chunk starts, with what the line declares.
#[derive(Debug)]
struct Boundary {
    line: usize, // 0-indexed
    kind: ChunkKind,
    name: Option<String>,
}

/// Split one file into chunks on language-aware heuristic boundaries.
///
/// Regex segmentation is deliberately coarse: cheap, extensible by adding
/// patterns, and it keeps whole constructs together, which is what matters
/// for retrieval. Falls back to fixed-size slicing when the language has no
/// pattern set or nothing matched.
pub fn chunk_file(file: &SourceFile) -> Vec<Chunk> {
    let lines: Vec<&str> = file.content.lines().collect();
    if lines.is_empty() {
        return Vec::new();
    }

    let patterns = match patterns_for(&file.lang) {
        Some(p) => p,
        None => return size_chunks(file, &lines),
    };
    let boundaries = find_boundaries(&lines, patterns);
    if boundaries.is_empty() {
        return size_chunks(file, &lines);
    }

    let mut chunks = Vec::new();

    // Preamble (imports, module docs) before the first construct.
    let first = boundaries[0].line;
    if first >= MIN_LINES {
        push_chunk(
            &mut chunks,
            file,
            &lines,
            0,
            first - 1,
            ChunkKind::Section,
            Some("imports/preamble".to_string()),
        );
    }

    let single = boundaries.len() == 1;
    for (i, b) in boundaries.iter().enumerate() {
        let end = if i + 1 < boundaries.len() {
            boundaries[i + 1].line - 1
        } else {
            lines.len() - 1
        };
        let len = end - b.line + 1;
        if len < MIN_LINES && !single {
            continue;
        }
        if len <= MAX_LINES {
            push_chunk(&mut chunks, file, &lines, b.line, end, b.kind, b.name.clone());
            continue;
        }
        // Oversized construct: consecutive slices, later ones marked continued.
        let mut start = b.line;
        let mut part = 1usize;
        while start <= end {
            let stop = (start + MAX_LINES - 1).min(end);
            let name = if part == 1 {
                b.name.clone()
            } else {
                Some(continuation_name(b.name.as_deref(), part))
            };
            push_chunk(&mut chunks, file, &lines, start, stop, b.kind, name);
            start = stop + 1;
            part += 1;
        }
    }
    chunks
}

/// Whole file as one section if it fits, otherwise fixed slices of MAX_LINES.
fn size_chunks(file: &SourceFile, lines: &[&str]) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < lines.len() {
        let stop = (start + MAX_LINES - 1).min(lines.len() - 1);
        push_chunk(&mut chunks, file, lines, start, stop, ChunkKind::Section, None);
        start = stop + 1;
    }
    chunks
}

fn find_boundaries(lines: &[&str], patterns: &[(Regex, ChunkKind)]) -> Vec<Boundary> {
    let mut out = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        for (re, kind) in patterns {
            if let Some(caps) = re.captures(line) {
                let name = caps
                    .name("name")
                    .map(|m| m.as_str().trim().to_string())
                    .filter(|s| !s.is_empty());
                out.push(Boundary { line: idx, kind: *kind, name });
                break; // first matching pattern wins
            }
        }
    }
    out
}

fn continuation_name(base: Option<&str>, part: usize) -> String {
    match base {
        Some(n) => format!("{n} (part {part})"),
        None => format!("part {part}"),
    }
}

fn push_chunk(
    chunks: &mut Vec<Chunk>,
    file: &SourceFile,
    lines: &[&str],
    start: usize, // 0-indexed inclusive
    end: usize,   // 0-indexed inclusive
    kind: ChunkKind,
    name: Option<String>,
) {
    let content = lines[start..=end].join("\n");
    let tokens = tokens::count(&content);
    chunks.push(Chunk {
        id: Chunk::stable_id(&file.rel_path, start + 1),
        path: file.path.to_string_lossy().to_string(),
        rel_path: file.rel_path.clone(),
        content,
        start_line: start + 1,
        end_line: end + 1,
        kind,
        name,
        lang: file.lang.clone(),
        tokens,
    });
}

/* --------------------------- boundary patterns --------------------------- */

struct LangPatterns {
    langs: &'static [&'static str],
    patterns: Vec<(Regex, ChunkKind)>,
}

fn patterns_for(lang: &str) -> Option<&'static [(Regex, ChunkKind)]> {
    PATTERN_TABLE
        .iter()
        .find(|set| set.langs.contains(&lang))
        .map(|set| set.patterns.as_slice())
}

fn p(kind: ChunkKind, pattern: &str) -> (Regex, ChunkKind) {
    (Regex::new(pattern).expect("boundary pattern"), kind)
}

static PATTERN_TABLE: Lazy<Vec<LangPatterns>> = Lazy::new(|| {
    use ChunkKind::*;
    vec![
        LangPatterns {
            langs: &["python"],
            patterns: vec![
                p(Class, r"^class\s+(?P<name>[A-Za-z_]\w*)"),
                p(Function, r"^(?:async\s+)?def\s+(?P<name>[A-Za-z_]\w*)"),
                p(Method, r"^\s+(?:async\s+)?def\s+(?P<name>[A-Za-z_]\w*)"),
                p(Constant, r"^(?P<name>[A-Z][A-Z0-9_]*)\s*(?::[^=]+)?="),
            ],
        },
        LangPatterns {
            langs: &["javascript", "javascriptreact", "typescript", "typescriptreact"],
            patterns: vec![
                p(Interface, r"^\s*(?:export\s+)?(?:declare\s+)?interface\s+(?P<name>[A-Za-z_$][\w$]*)"),
                p(Type, r"^\s*(?:export\s+)?(?:declare\s+)?type\s+(?P<name>[A-Za-z_$][\w$]*)\s*="),
                p(Enum, r"^\s*(?:export\s+)?(?:declare\s+)?(?:const\s+)?enum\s+(?P<name>[A-Za-z_$][\w$]*)"),
                p(Class, r"^\s*(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+(?P<name>[A-Za-z_$][\w$]*)"),
                p(Function, r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*(?P<name>[A-Za-z_$][\w$]*)"),
                p(Function, r"^\s*(?:export\s+)?(?:const|let|var)\s+(?P<name>[A-Za-z_$][\w$]*)(?:\s*:[^=]*)?\s*=\s*(?:async\s+)?(?:\([^)]*\)|[A-Za-z_$][\w$]*)\s*=>"),
                p(Constant, r"^\s*(?:export\s+)?const\s+(?P<name>[A-Z_][A-Z0-9_]*)\s*="),
                p(Method, r"^\s+(?:(?:public|private|protected|static|readonly|override)\s+)+(?:async\s+)?(?P<name>[A-Za-z_$][\w$]*)\s*\("),
                p(Method, r"^\s+async\s+(?P<name>[A-Za-z_$][\w$]*)\s*\("),
                p(Module, r"^\s*module\.exports"),
            ],
        },
        LangPatterns {
            langs: &["go"],
            patterns: vec![
                p(Method, r"^func\s+\([^)]*\)\s*(?P<name>[A-Za-z_]\w*)"),
                p(Function, r"^func\s+(?P<name>[A-Za-z_]\w*)"),
                p(Interface, r"^type\s+(?P<name>[A-Za-z_]\w*)\s+interface\b"),
                p(Class, r"^type\s+(?P<name>[A-Za-z_]\w*)\s+struct\b"),
                p(Type, r"^type\s+(?P<name>[A-Za-z_]\w*)"),
                p(Constant, r"^const\s+(?P<name>[A-Za-z_]\w*)?"),
                p(Variable, r"^var\s+(?P<name>[A-Za-z_]\w*)"),
            ],
        },
        LangPatterns {
            langs: &["rust"],
            patterns: vec![
                p(Function, r#"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?(?:unsafe\s+)?(?:extern\s+"[^"]*"\s+)?fn\s+(?P<name>[A-Za-z_]\w*)"#),
                p(Class, r"^\s*(?:pub(?:\([^)]*\))?\s+)?struct\s+(?P<name>[A-Za-z_]\w*)"),
                p(Enum, r"^\s*(?:pub(?:\([^)]*\))?\s+)?enum\s+(?P<name>[A-Za-z_]\w*)"),
                p(Interface, r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:unsafe\s+)?trait\s+(?P<name>[A-Za-z_]\w*)"),
                p(Class, r"^impl(?:\s*<[^>]*>)?\s+(?P<name>[A-Za-z_][\w:]*)"),
                p(Module, r"^\s*(?:pub(?:\([^)]*\))?\s+)?mod\s+(?P<name>[A-Za-z_]\w*)"),
                p(Type, r"^\s*(?:pub(?:\([^)]*\))?\s+)?type\s+(?P<name>[A-Za-z_]\w*)"),
                p(Constant, r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:const|static)\s+(?P<name>[A-Za-z_]\w*)"),
            ],
        },
        LangPatterns {
            langs: &["ruby"],
            patterns: vec![
                p(Class, r"^\s*class\s+(?P<name>[A-Z]\w*)"),
                p(Module, r"^\s*module\s+(?P<name>[A-Z]\w*)"),
                p(Function, r"^def\s+(?P<name>[\w?!=]+)"),
                p(Method, r"^\s+def\s+(?P<name>[\w?!=]+)"),
            ],
        },
        LangPatterns {
            langs: &["php"],
            patterns: vec![
                p(Class, r"^\s*(?:abstract\s+|final\s+)?class\s+(?P<name>\w+)"),
                p(Interface, r"^\s*interface\s+(?P<name>\w+)"),
                p(Class, r"^\s*trait\s+(?P<name>\w+)"),
                p(Enum, r"^\s*enum\s+(?P<name>\w+)"),
                p(Function, r"^function\s+(?P<name>\w+)"),
                p(Method, r"^\s+(?:(?:public|private|protected|static|final|abstract)\s+)*function\s+(?P<name>\w+)"),
            ],
        },
        LangPatterns {
            langs: &["java"],
            patterns: vec![
                p(Interface, r"^\s*(?:(?:public|private|protected|abstract|static|final|sealed)\s+)*interface\s+(?P<name>\w+)"),
                p(Enum, r"^\s*(?:(?:public|private|protected|static|final)\s+)*enum\s+(?P<name>\w+)"),
                p(Class, r"^\s*(?:(?:public|private|protected|abstract|static|final|sealed)\s+)*(?:class|record)\s+(?P<name>\w+)"),
                p(Method, r"^\s+(?:(?:public|private|protected|static|final|synchronized|abstract|native)\s+)+[\w<>\[\],\s]*?\b(?P<name>\w+)\s*\("),
            ],
        },
        LangPatterns {
            langs: &["kotlin"],
            patterns: vec![
                p(Class, r"^\s*(?:(?:public|private|internal|abstract|open|final|sealed|data|inner|annotation)\s+)*class\s+(?P<name>\w+)"),
                p(Interface, r"^\s*(?:(?:public|private|internal|sealed|fun)\s+)*interface\s+(?P<name>\w+)"),
                p(Module, r"^\s*(?:(?:public|private|internal)\s+)*object\s+(?P<name>\w+)"),
                p(Function, r"^\s*(?:(?:public|private|internal|protected|open|override|suspend|inline|operator|infix|tailrec)\s+)*fun\s+(?:<[^>]*>\s+)?(?P<name>\w+)"),
                p(Constant, r"^\s*const\s+val\s+(?P<name>\w+)"),
            ],
        },
        LangPatterns {
            langs: &["scala"],
            patterns: vec![
                p(Class, r"^\s*(?:(?:final|abstract|sealed|case|implicit)\s+)*class\s+(?P<name>\w+)"),
                p(Interface, r"^\s*(?:sealed\s+)?trait\s+(?P<name>\w+)"),
                p(Module, r"^\s*(?:case\s+)?object\s+(?P<name>\w+)"),
                p(Function, r"^\s*(?:(?:override|private|protected|implicit|final)\s+)*def\s+(?P<name>\w+)"),
            ],
        },
        LangPatterns {
            langs: &["swift"],
            patterns: vec![
                p(Class, r"^\s*(?:(?:public|private|internal|open|final)\s+)*class\s+(?P<name>\w+)"),
                p(Class, r"^\s*(?:(?:public|private|internal)\s+)*struct\s+(?P<name>\w+)"),
                p(Interface, r"^\s*(?:public\s+)?protocol\s+(?P<name>\w+)"),
                p(Enum, r"^\s*(?:(?:public|private|internal|indirect)\s+)*enum\s+(?P<name>\w+)"),
                p(Class, r"^\s*extension\s+(?P<name>[\w.]+)"),
                p(Function, r"^\s*(?:(?:public|private|internal|open|static|class|override|final|mutating)\s+)*func\s+(?P<name>\w+)"),
            ],
        },
        LangPatterns {
            langs: &["csharp"],
            patterns: vec![
                p(Module, r"^\s*namespace\s+(?P<name>[\w.]+)"),
                p(Interface, r"^\s*(?:(?:public|private|protected|internal|static|abstract|sealed|partial)\s+)*interface\s+(?P<name>\w+)"),
                p(Enum, r"^\s*(?:(?:public|private|protected|internal)\s+)*enum\s+(?P<name>\w+)"),
                p(Class, r"^\s*(?:(?:public|private|protected|internal|static|abstract|sealed|partial)\s+)*(?:class|struct|record)\s+(?P<name>\w+)"),
                p(Method, r"^\s+(?:(?:public|private|protected|internal|static|virtual|override|async|sealed|partial)\s+)+[\w<>\[\],\s]*?\b(?P<name>\w+)\s*\("),
            ],
        },
        LangPatterns {
            langs: &["c"],
            patterns: vec![
                p(Class, r"^(?:typedef\s+)?struct\s+(?P<name>\w+)"),
                p(Enum, r"^(?:typedef\s+)?enum\s+(?P<name>\w+)"),
                p(Type, r"^typedef\s+"),
                p(Function, r"^(?:(?:static|inline|extern)\s+)*[A-Za-z_]\w*(?:\s+[A-Za-z_]\w*)*[\s\*]+(?P<name>[A-Za-z_]\w*)\s*\([^;]*$"),
            ],
        },
        LangPatterns {
            langs: &["cpp"],
            patterns: vec![
                p(Class, r"^\s*(?:template\s*<[^>]*>\s*)?class\s+(?P<name>\w+)"),
                p(Class, r"^\s*(?:typedef\s+)?struct\s+(?P<name>\w+)"),
                p(Module, r"^\s*namespace\s+(?P<name>\w+)"),
                p(Enum, r"^\s*(?:typedef\s+)?enum\s+(?:class\s+)?(?P<name>\w+)"),
                p(Method, r"^[\w:<>~&\*\s]+::(?P<name>~?\w+)\s*\([^;]*$"),
                p(Function, r"^(?:(?:static|inline|extern|constexpr|virtual)\s+)*[A-Za-z_]\w*(?:\s+[A-Za-z_]\w*)*[\s\*&]+(?P<name>[A-Za-z_]\w*)\s*\([^;]*$"),
            ],
        },
        LangPatterns {
            langs: &["markdown", "mdx"],
            patterns: vec![
                p(Section, r"^#{1,6}\s+(?P<name>.+?)\s*$"),
            ],
        },
    ]
});

/* ----------------------------------- tests ----------------------------------- */
