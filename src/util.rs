// lmfetch/src/util.rs

use sha2::{
    Digest,
    Sha256
};
use std::{
    fs::Metadata,
    path::Path
};

/// Modified time → UNIX seconds. Falls back to created() if needed.
pub fn to_unix_epoch(meta: &Metadata) -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    fn secs(t: SystemTime) -> Option<i64> {
        t.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs() as i64)
    }
    meta.modified()
        .ok()
        .and_then(secs)
        .or_else(|| meta.created().ok().and_then(secs))
        .unwrap_or(0)
}

/// Current wall clock → UNIX seconds.
pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Path relative to root, forward-slash normalized.
pub fn normalize_rel(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.to_string_lossy().replace('\\', "/")
}

/// Lowercase hex SHA-256 of arbitrary text.
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Directory depth of a normalized relative path ("src/a/b.rs" → 2).
pub fn dir_depth(rel_path: &str) -> usize {
    rel_path.matches('/').count()
}

/* ----------------------------------- tests ----------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn rel_normalization() {
        let root = PathBuf::from("/repo");
        let p = PathBuf::from("/repo/src/lib.rs");
        assert_eq!(normalize_rel(&root, &p), "src/lib.rs");
    }

    #[test]
    fn sha_is_stable() {
        assert_eq!(sha256_hex("abc"), sha256_hex("abc"));
        assert_ne!(sha256_hex("abc"), sha256_hex("abd"));
        assert_eq!(sha256_hex("abc").len(), 64);
    }

    #[test]
    fn depth_counts_separators() {
        assert_eq!(dir_depth("main.rs"), 0);
        assert_eq!(dir_depth("src/main.rs"), 1);
        assert_eq!(dir_depth("a/b/c/d.py"), 3);
    }
}
