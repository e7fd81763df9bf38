// lmfetch/src/embed.rs

use anyhow::{
    bail,
    Context,
    Result
};
use serde::{
    Deserialize,
    Serialize
};
use std::{
    collections::HashMap,
    fs,
    path::PathBuf,
    sync::Mutex,
    thread,
    time::Duration,
};
use crate::util;

const BATCH_SIZE: usize = 100;
const BATCH_TIMEOUT_SECS: u64 = 30;
const MAX_RETRIES: usize = 2;
const BACKOFF_BASE_MS: u64 = 500;

const DEFAULT_EMBED_MODEL: &str = "text-embedding-3-small";
const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_DIMENSION: usize = 1536;

/// Black-box vector generator.
pub trait EmbeddingProvider {
    fn dimension(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Black-box text generator (used for the hypothetical answer document).
pub trait TextGenerator {
    fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String>;
}

/* ----------------------------- HTTP providers ----------------------------- */

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    encoding_format: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

pub struct HttpEmbeddings {
    api_key: String,
    model: String,
    dimension: usize,
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpEmbeddings {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(BATCH_TIMEOUT_SECS))
            .build()
            .context("building embedding http client")?;
        Ok(Self {
            api_key: api_key.into(),
            model: DEFAULT_EMBED_MODEL.to_string(),
            dimension: DEFAULT_DIMENSION,
            base_url: DEFAULT_BASE_URL.to_string(),
            client,
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }
}

impl EmbeddingProvider for HttpEmbeddings {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            encoding_format: "float",
        };
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .context("sending embedding request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!("embedding api error {status}: {body}");
        }

        let parsed: EmbeddingResponse = response.json().context("decoding embedding response")?;
        // The API may reorder; restore input order by index.
        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        if data.len() != texts.len() {
            bail!("embedding api returned {} vectors for {} inputs", data.len(), texts.len());
        }
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: usize,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

pub struct HttpGenerator {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpGenerator {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(BATCH_TIMEOUT_SECS))
            .build()
            .context("building generator http client")?;
        Ok(Self {
            api_key: api_key.into(),
            model: DEFAULT_CHAT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client,
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl TextGenerator for HttpGenerator {
    fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage { role: "user", content: prompt }],
            max_tokens,
        };
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .context("sending generation request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!("generation api error {status}: {body}");
        }
        let parsed: ChatResponse = response.json().context("decoding generation response")?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|s| !s.trim().is_empty())
            .context("generation response had no content")
    }
}

/* ------------------------------ hyde document ------------------------------ */

/// Ask the generator for a plausible answer snippet and retrieve by
/// similarity to that. Falls back to the raw query on any failure.
pub fn hyde_document(generator: &dyn TextGenerator, query: &str) -> String {
    let prompt = format!(
        "write a short hypothetical code snippet that answers this question: {query}"
    );
    match generator.generate(&prompt, 200) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::warn!(error = %e, "hypothetical answer generation failed, using raw query");
            query.to_string()
        }
    }
}

/* ------------------------------ tiered cache ------------------------------ */

/// Embeds texts through a two-tier cache: an in-memory map keyed by content
/// hash, and individual JSON vector files on disk. Disk writes are best
/// effort; a failed write only costs a recompute later.
pub struct Embedder<P: EmbeddingProvider> {
    provider: P,
    memory: Mutex<HashMap<String, Vec<f32>>>,
    disk_dir: Option<PathBuf>,
    max_retries: usize,
    backoff_base: Duration,
}

impl<P: EmbeddingProvider> Embedder<P> {
    pub fn new(provider: P, disk_dir: Option<PathBuf>) -> Self {
        Self {
            provider,
            memory: Mutex::new(HashMap::new()),
            disk_dir,
            max_retries: MAX_RETRIES,
            backoff_base: Duration::from_millis(BACKOFF_BASE_MS),
        }
    }

    #[cfg(test)]
    fn with_backoff(mut self, max_retries: usize, base: Duration) -> Self {
        self.max_retries = max_retries;
        self.backoff_base = base;
        self
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    /// One vector per input text, in input order. Failed batches degrade to
    /// zero vectors rather than aborting the run.
    pub fn embed_all(&self, texts: &[String]) -> Vec<Vec<f32>> {
        let keys: Vec<String> = texts.iter().map(|t| util::sha256_hex(t)).collect();
        let mut out: Vec<Option<Vec<f32>>> = vec![None; texts.len()];

        let mut pending: Vec<usize> = Vec::new();
        for (i, key) in keys.iter().enumerate() {
            if let Some(v) = self.lookup(key) {
                out[i] = Some(v);
            } else {
                pending.push(i);
            }
        }

        for batch in pending.chunks(BATCH_SIZE) {
            let inputs: Vec<String> = batch.iter().map(|&i| texts[i].clone()).collect();
            match self.embed_with_retry(&inputs) {
                Ok(vectors) => {
                    for (&i, vector) in batch.iter().zip(vectors) {
                        self.store(&keys[i], &vector);
                        out[i] = Some(vector);
                    }
                }
                Err(e) => {
                    // Degrade, but never cache the substitutes.
                    tracing::warn!(error = %e, batch = inputs.len(), "embedding batch failed, using zero vectors");
                    for &i in batch {
                        out[i] = Some(vec![0.0; self.provider.dimension()]);
                    }
                }
            }
        }

        out.into_iter()
            .map(|v| v.unwrap_or_else(|| vec![0.0; self.provider.dimension()]))
            .collect()
    }

    fn embed_with_retry(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut attempt = 0;
        loop {
            match self.provider.embed_batch(inputs) {
                Ok(v) => return Ok(v),
                Err(e) if attempt < self.max_retries => {
                    let delay = self.backoff_base * 2u32.pow(attempt as u32);
                    tracing::warn!(error = %e, attempt, "embedding request failed, retrying");
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn lookup(&self, key: &str) -> Option<Vec<f32>> {
        if let Some(v) = self.lock_memory().get(key) {
            return Some(v.clone());
        }
        let dir = self.disk_dir.as_ref()?;
        let raw = fs::read_to_string(dir.join(format!("{key}.json"))).ok()?;
        let vector: Vec<f32> = serde_json::from_str(&raw).ok()?;
        self.lock_memory().insert(key.to_string(), vector.clone());
        Some(vector)
    }

    fn store(&self, key: &str, vector: &[f32]) {
        self.lock_memory().insert(key.to_string(), vector.to_vec());
        let Some(dir) = self.disk_dir.as_ref() else { return };
        // Fire and forget: a lost write is only a future cache miss.
        let write = || -> Result<()> {
            fs::create_dir_all(dir)?;
            let json = serde_json::to_string(vector)?;
            fs::write(dir.join(format!("{key}.json")), json)?;
            Ok(())
        };
        if let Err(e) = write() {
            tracing::warn!(error = %e, "embedding cache write failed");
        }
    }

    fn lock_memory(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<f32>>> {
        self.memory.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Default disk location: `$HOME/.cache/lmfetch/embeddings/`.
pub fn default_embedding_dir() -> Result<PathBuf> {
    Ok(crate::cache::cache_root()?.join("embeddings"))
}

/* ----------------------------------- tests ----------------------------------- */
