// lmfetch/src/commands.rs

use anyhow::{
    anyhow,
    Result
};
use std::env;
use crate::{
    cache::ChunkCache,
    pipeline::ContextBuilder
};

pub fn run_cli() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let cmd = args.get(1).map(|s| s.as_str()).unwrap_or("help");

    match cmd {
        "cache-clear" => cache_clear(),
        "cache-prune" => cache_prune(),
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        _ => fetch(&args[1..]),
    }
}

fn fetch(args: &[String]) -> Result<()> {
    let mut positional: Vec<&str> = Vec::new();
    let mut budget = "50k".to_string();
    let mut includes: Vec<String> = Vec::new();
    let mut excludes: Vec<String> = Vec::new();
    let mut fast = true;
    let mut force_large = false;
    let mut quiet = false;
    let mut stats = false;

    for arg in args {
        if let Some(v) = arg.strip_prefix("--budget=") {
            budget = v.to_string();
        } else if let Some(v) = arg.strip_prefix("--include=") {
            includes.push(v.to_string());
        } else if let Some(v) = arg.strip_prefix("--exclude=") {
            excludes.push(v.to_string());
        } else if arg == "--slow" {
            fast = false;
        } else if arg == "--force-large" {
            force_large = true;
        } else if arg == "--quiet" {
            quiet = true;
        } else if arg == "--stats" {
            stats = true;
        } else if arg.starts_with("--") {
            return Err(anyhow!("unknown flag {arg}; see `lmfetch help`"));
        } else {
            positional.push(arg.as_str());
        }
    }

    let target = positional
        .first()
        .ok_or_else(|| anyhow!("missing <path-or-url>; see `lmfetch help`"))?;
    let query = positional[1..].join(" ");
    if query.trim().is_empty() {
        return Err(anyhow!("missing <query>; see `lmfetch help`"));
    }

    let mut builder = ContextBuilder::new(*target, query)
        .budget(budget)
        .includes(includes)
        .excludes(excludes)
        .fast(fast)
        .force_large(force_large);
    if !quiet {
        builder = builder.on_progress(Box::new(|m| eprintln!("[lmfetch] {m}")));
    }

    let result = builder.build()?;
    println!("{}", result.context);
    if stats {
        eprintln!(
            "[lmfetch] files: {}  chunks: {}  cache hits: {}  tokens packed: {}  selected: {}",
            result.files_processed,
            result.chunks_created,
            result.cache_hits,
            result.tokens,
            result.chunks.len(),
        );
    }
    Ok(())
}

fn cache_clear() -> Result<()> {
    let cache = ChunkCache::open(&ChunkCache::default_path()?)?;
    cache.clear()?;
    println!("Chunk cache cleared.");
    Ok(())
}

fn cache_prune() -> Result<()> {
    let cache = ChunkCache::open(&ChunkCache::default_path()?)?;
    let evicted = cache.prune()?;
    println!("Pruned {evicted} stale file(s) from the chunk cache.");
    Ok(())
}

fn print_help() {
    println!(
        r#"
lmfetch: relevance-ranked, token-budgeted code context for LLM prompts

USAGE:
    lmfetch <path-or-url> <query...> [flags]
    lmfetch cache-clear       # empty the chunk cache
    lmfetch cache-prune       # drop cache entries unused for 30 days
    lmfetch help              # show this message

FLAGS:
    --budget=N[k|m]   token budget for the emitted context (default 50k)
    --include=GLOB    only keep files matching GLOB (repeatable)
    --exclude=GLOB    ignore files matching GLOB (repeatable)
    --slow            hybrid ranking: keyword + embeddings + importance
    --force-large     lift the 1 MiB / 20k-line per-file gates
    --quiet           suppress progress messages on stderr
    --stats           print run statistics on stderr

The context document is written to stdout. Remote URLs must already be
checked out under the cache directory (repos/<owner>/<repo>).
"#
    );
}
