// lmfetch/src/pipeline.rs

use anyhow::Result;
use rayon::prelude::*;
use std::{
    env,
    path::PathBuf
};
use crate::{
    cache::{
        self,
        ChunkCache
    },
    chunk::ScoredChunk,
    chunker,
    embed::{
        self,
        Embedder,
        HttpEmbeddings,
        HttpGenerator
    },
    format,
    graph,
    hybrid::HybridRanker,
    importance,
    ranker::{
        KeywordRanker,
        Ranker
    },
    select,
    source::{
        self,
        DiscoverOptions,
        LocalSource,
        RemoteSource,
        Source,
        SourceFile
    },
    tokens,
};

pub type ProgressFn = Box<dyn Fn(&str)>;

/// Configures and runs one retrieval pipeline:
/// discover → chunk (cached) → analyze → rank → select → format.
pub struct ContextBuilder {
    target: String,
    query: String,
    budget: String,
    includes: Vec<String>,
    excludes: Vec<String>,
    fast: bool,
    force_large: bool,
    on_progress: Option<ProgressFn>,
    cache_path: Option<PathBuf>,
    embedding_dir: Option<PathBuf>,
}

/// What one build() run produced.
pub struct ContextResult {
    /// The rendered Markdown context.
    pub context: String,
    /// The chunks that made the cut, in pack order.
    pub chunks: Vec<ScoredChunk>,
    /// Tokens spent, including per-chunk formatting overhead.
    pub tokens: usize,
    pub files_processed: usize,
    pub chunks_created: usize,
    pub cache_hits: usize,
}

impl ContextBuilder {
    pub fn new(target: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            query: query.into(),
            budget: "50k".to_string(),
            includes: Vec::new(),
            excludes: Vec::new(),
            fast: true,
            force_large: false,
            on_progress: None,
            cache_path: None,
            embedding_dir: None,
        }
    }

    /// Token budget: `"50k"`, `"1.5m"`, or a plain integer string.
    pub fn budget(mut self, budget: impl Into<String>) -> Self {
        self.budget = budget.into();
        self
    }

    pub fn includes(mut self, globs: Vec<String>) -> Self {
        self.includes = globs;
        self
    }

    pub fn excludes(mut self, globs: Vec<String>) -> Self {
        self.excludes = globs;
        self
    }

    /// Keyword-only ranking (default). `false` adds embeddings + HyDE.
    pub fn fast(mut self, fast: bool) -> Self {
        self.fast = fast;
        self
    }

    pub fn force_large(mut self, force_large: bool) -> Self {
        self.force_large = force_large;
        self
    }

    pub fn on_progress(mut self, callback: ProgressFn) -> Self {
        self.on_progress = Some(callback);
        self
    }

    /// Override the chunk cache location (the default lives under
    /// `$HOME/.cache/lmfetch/`).
    pub fn cache_path(mut self, path: PathBuf) -> Self {
        self.cache_path = Some(path);
        self
    }

    pub fn embedding_dir(mut self, dir: PathBuf) -> Self {
        self.embedding_dir = Some(dir);
        self
    }

    pub fn build(self) -> Result<ContextResult> {
        let budget = tokens::parse_budget(&self.budget)?;
        let result = self.run(budget);
        // The memo would otherwise hold every chunk body ever counted.
        tokens::clear_memo();
        result
    }

    fn run(&self, budget: usize) -> Result<ContextResult> {
        let opts = DiscoverOptions {
            includes: self.includes.clone(),
            excludes: self.excludes.clone(),
            force_large: self.force_large,
        };

        self.report("Discovering files");
        let src: Box<dyn Source> = if is_remote(&self.target) {
            let checkout = source::checkout_dir_for(&cache::cache_root()?, &self.target)?;
            Box::new(RemoteSource::prepared(self.target.as_str(), checkout, opts)?)
        } else {
            Box::new(LocalSource::new(&self.target, opts)?)
        };
        let files = src.discover()?;
        self.report(&format!("Found {} files", files.len()));

        if files.is_empty() {
            return Ok(ContextResult {
                context: empty_context(&self.query),
                chunks: Vec::new(),
                tokens: 0,
                files_processed: 0,
                chunks_created: 0,
                cache_hits: 0,
            });
        }

        self.report("Analyzing dependencies");
        let dep_graph = graph::build_graph(&files);
        let centrality = graph::centrality(&dep_graph);
        let prior = importance::importance_map(&files);
        let file_scores = importance::combined_scores(&prior, &centrality);

        self.report("Chunking files");
        let cache_path = match &self.cache_path {
            Some(p) => p.clone(),
            None => ChunkCache::default_path()?,
        };
        let mut chunk_cache = ChunkCache::open(&cache_path)?;
        let (all_chunks, cache_hits) = self.chunk_all(&files, &mut chunk_cache)?;
        let chunks_created = all_chunks.len();
        self.report(&format!("Created {chunks_created} chunks"));

        self.report("Ranking chunks");
        let ranked = if self.fast {
            self.report("Computing keyword scores");
            KeywordRanker.rank(all_chunks, &self.query)?
        } else {
            let api_key = env::var("OPENAI_API_KEY").unwrap_or_default();
            let base_url = env::var("OPENAI_BASE_URL").ok();

            let mut provider = HttpEmbeddings::new(api_key.clone())?;
            let mut generator = HttpGenerator::new(api_key)?;
            if let Some(url) = base_url {
                provider = provider.with_base_url(url.clone());
                generator = generator.with_base_url(url);
            }
            let disk_dir = match &self.embedding_dir {
                Some(d) => Some(d.clone()),
                None => embed::default_embedding_dir().ok(),
            };
            let embedder = Embedder::new(provider, disk_dir);
            let progress = self.on_progress.as_deref();
            let hybrid = HybridRanker::new(&embedder, &generator, &file_scores, progress);
            hybrid.rank(all_chunks, &self.query)?
        };

        self.report("Selecting best chunks");
        let selection = select::select(ranked, budget);

        self.report("Formatting context");
        let context = if selection.chunks.is_empty() {
            empty_context(&self.query)
        } else {
            format::format_context(&selection.chunks)
        };

        Ok(ContextResult {
            context,
            tokens: selection.tokens,
            chunks: selection.chunks,
            files_processed: files.len(),
            chunks_created,
            cache_hits,
        })
    }

    /// Cached chunks come straight from the store; the rest are chunked in
    /// parallel CPU batches with write-back between batches.
    fn chunk_all(
        &self,
        files: &[SourceFile],
        chunk_cache: &mut ChunkCache,
    ) -> Result<(Vec<crate::chunk::Chunk>, usize)> {
        let mut all_chunks = Vec::new();
        let mut uncached: Vec<&SourceFile> = Vec::new();
        let mut cache_hits = 0usize;

        for f in files {
            let key = f.path.to_string_lossy().to_string();
            let fresh = chunk_cache.has_fresh_chunks(&key, f.mtime).unwrap_or(false);
            if fresh {
                match chunk_cache.get_chunks(f) {
                    Ok(chunks) => {
                        cache_hits += 1;
                        all_chunks.extend(chunks);
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(path = %key, error = %e, "cache read failed, re-chunking");
                    }
                }
            }
            uncached.push(f);
        }

        let batch_size = uncached.len().div_ceil(10).clamp(5, 20);
        for batch in uncached.chunks(batch_size) {
            let chunked: Vec<Vec<crate::chunk::Chunk>> =
                batch.par_iter().map(|f| chunker::chunk_file(f)).collect();
            for (f, chunks) in batch.iter().zip(chunked) {
                let key = f.path.to_string_lossy().to_string();
                let write = match chunk_cache.put_file(f) {
                    Ok(()) => chunk_cache.put_chunks(&key, &chunks),
                    Err(e) => Err(e),
                };
                if let Err(e) = write {
                    // A lost write only means re-chunking next run.
                    tracing::warn!(path = %key, error = %e, "chunk cache write failed");
                }
                all_chunks.extend(chunks);
            }
        }

        Ok((all_chunks, cache_hits))
    }

    fn report(&self, message: &str) {
        tracing::debug!(phase = message, "pipeline");
        if let Some(cb) = &self.on_progress {
            cb(message);
        }
    }
}

fn is_remote(target: &str) -> bool {
    target.starts_with("http://") || target.starts_with("https://")
}

fn empty_context(query: &str) -> String {
    format!("## No context found\n\nNo source chunks matched the query: {query}\n")
}

/* ----------------------------------- tests ----------------------------------- */
