// lmfetch/src/chunk.rs

use serde::{
    Deserialize,
    Serialize
};
use crate::util::sha256_hex;

/// Code-construct category a chunk was cut on.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Function,
    Class,
    Method,
    Interface,
    Type,
    Enum,
    Module,
    Section,
    Constant,
    Variable,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Function => "function",
            ChunkKind::Class => "class",
            ChunkKind::Method => "method",
            ChunkKind::Interface => "interface",
            ChunkKind::Type => "type",
            ChunkKind::Enum => "enum",
            ChunkKind::Module => "module",
            ChunkKind::Section => "section",
            ChunkKind::Constant => "constant",
            ChunkKind::Variable => "variable",
        }
    }

    /// Inverse of `as_str`; unknown strings land on `Section` so cache rows
    /// written by newer versions still load.
    pub fn parse(s: &str) -> ChunkKind {
        match s {
            "function" => ChunkKind::Function,
            "class" => ChunkKind::Class,
            "method" => ChunkKind::Method,
            "interface" => ChunkKind::Interface,
            "type" => ChunkKind::Type,
            "enum" => ChunkKind::Enum,
            "module" => ChunkKind::Module,
            "constant" => ChunkKind::Constant,
            "variable" => ChunkKind::Variable,
            _ => ChunkKind::Section,
        }
    }
}

/// A contiguous block of source lines, the atomic unit of retrieval.
///
/// Line numbers are 1-indexed and inclusive; `content` is the verbatim text
/// of those lines. Chunks of one file never overlap.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Chunk {
    pub id: String,
    /// Absolute path, as discovered.
    pub path: String,
    /// Forward-slash relative path; the key used everywhere downstream.
    pub rel_path: String,
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
    pub kind: ChunkKind,
    pub name: Option<String>,
    pub lang: String,
    pub tokens: usize,
}

impl Chunk {
    /// Stable id: a file+position hash, identical across runs and cache
    /// round-trips for the same (path, start line).
    pub fn stable_id(rel_path: &str, start_line: usize) -> String {
        let digest = sha256_hex(&format!("{rel_path}:{start_line}"));
        digest[..16].to_string()
    }
}

/// A chunk with its query-relevance score attached.
#[derive(Clone, Debug)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f64,
}

/* ----------------------------------- tests ----------------------------------- */
