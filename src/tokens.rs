// lmfetch/src/tokens.rs

use anyhow::{
    bail,
    Result
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::{
    collections::HashMap,
    hash::{
        Hash,
        Hasher
    },
    sync::Mutex,
};
use tiktoken_rs::{
    cl100k_base,
    CoreBPE
};

static BPE: Lazy<CoreBPE> = Lazy::new(|| {
    // The vocabulary ships inside the crate; loading it cannot fail at runtime.
    cl100k_base().expect("embedded cl100k_base vocabulary")
});

// Content-keyed memo. Cleared at the end of every pipeline run so long
// sessions don't accumulate every chunk body ever counted.
static MEMO: Lazy<Mutex<HashMap<u64, usize>>> = Lazy::new(|| Mutex::new(HashMap::new()));

static BUDGET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i)(\d+(?:\.\d+)?)(k|m)?$").expect("budget grammar")
});

/// cl100k_base token count, memoized by content.
pub fn count(text: &str) -> usize {
    let key = content_key(text);
    if let Some(n) = lock_memo().get(&key) {
        return *n;
    }
    let n = BPE.encode_ordinary(text).len();
    lock_memo().insert(key, n);
    n
}

/// Drop all memoized counts. Call once per pipeline teardown.
pub fn clear_memo() {
    lock_memo().clear();
}

/// `"50k"` → 50 000, `"1.5m"` → 1 500 000, `"12345"` → 12 345.
/// Anything outside `^\d+(\.\d+)?(k|m)?$` (case-insensitive) is an error.
pub fn parse_budget(s: &str) -> Result<usize> {
    let trimmed = s.trim();
    let caps = match BUDGET_RE.captures(trimmed) {
        Some(c) => c,
        None => bail!("invalid token budget {s:?}: expected N, Nk, or Nm"),
    };
    let value: f64 = caps[1].parse()?;
    let multiplier = match caps.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
        Some(ref u) if u == "k" => 1_000.0,
        Some(ref u) if u == "m" => 1_000_000.0,
        _ => 1.0,
    };
    let tokens = (value * multiplier).floor();
    if tokens < 1.0 {
        bail!("token budget must be at least 1, got {s:?}");
    }
    Ok(tokens as usize)
}

/* ----------------------------- helpers ----------------------------- */

fn lock_memo() -> std::sync::MutexGuard<'static, HashMap<u64, usize>> {
    MEMO.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn content_key(text: &str) -> u64 {
    let mut h = std::collections::hash_map::DefaultHasher::new();
    text.hash(&mut h);
    h.finish()
}

/* ----------------------------------- tests ----------------------------------- */
