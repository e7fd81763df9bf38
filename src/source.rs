// lmfetch/src/source.rs

use anyhow::{
    bail,
    Context,
    Result
};
use ignore::{
    gitignore::GitignoreBuilder,
    overrides::OverrideBuilder,
    WalkBuilder
};
use std::{
    fs,
    io::Read,
    path::{
        Path,
        PathBuf
    },
};
use crate::util;

const MAX_FILE_BYTES: u64 = 1024 * 1024; // 1 MiB hard cap per file
const MAX_FILE_LINES: usize = 20_000;
const BINARY_SNIFF_BYTES: usize = 4096;

/// Directory names never worth descending into, regardless of ignore files.
const SKIP_DIRS: &[&str] = &[
    ".git", ".hg", ".svn",
    "node_modules", "bower_components", ".yarn", ".pnpm-store",
    "dist", "build", "out", "coverage", ".next", ".nuxt", ".output",
    ".venv", "venv", "env", "__pycache__",
    ".mypy_cache", ".pytest_cache", ".ruff_cache", ".tox",
    "target", "vendor", ".gradle",
    ".idea", ".vscode", ".cache", ".terraform",
    "Pods", "DerivedData",
];

/// Extensions that are never source text: media, archives, artifacts, fonts.
const BINARY_EXTS: &[&str] = &[
    // images
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "tiff", "svg", "psd",
    // audio / video
    "mp3", "wav", "ogg", "flac", "m4a", "aac",
    "mp4", "avi", "mov", "mkv", "webm", "flv",
    // archives
    "zip", "tar", "gz", "bz2", "xz", "7z", "rar", "tgz",
    // compiled artifacts
    "exe", "dll", "so", "dylib", "o", "a", "obj", "class", "jar", "war",
    "pyc", "pyo", "wasm", "bin", "rlib",
    // fonts
    "ttf", "otf", "woff", "woff2", "eot",
    // documents / databases
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "db", "sqlite",
];

/// Glob patterns ignored everywhere even without a .gitignore.
const DEFAULT_IGNORE_GLOBS: &[&str] = &[
    "*.min.js", "*.min.css", "*.map",
    "package-lock.json", "yarn.lock", "pnpm-lock.yaml",
    "Cargo.lock", "poetry.lock", "Gemfile.lock", "composer.lock",
    "*.snap", ".DS_Store",
];

/// A discovered corpus file; lives for one pipeline run.
#[derive(Clone, Debug)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Forward-slash path relative to the discovery root.
    pub rel_path: String,
    pub content: String,
    pub lang: String,
    pub size: u64,
    /// Modification time, UNIX seconds.
    pub mtime: i64,
}

/// Caller knobs for discovery.
#[derive(Clone, Debug, Default)]
pub struct DiscoverOptions {
    /// When non-empty, a file must match at least one of these globs.
    pub includes: Vec<String>,
    /// Extra ignore globs, merged into the root ignore set.
    pub excludes: Vec<String>,
    /// Lift the 1 MiB / 20k-line size gates.
    pub force_large: bool,
}

/// Where the corpus comes from. Two realizations: a plain local directory,
/// and a remote repository that has already been materialized locally.
pub trait Source {
    fn root(&self) -> &Path;
    fn discover(&self) -> Result<Vec<SourceFile>>;
}

pub struct LocalSource {
    root: PathBuf,
    opts: DiscoverOptions,
}

impl LocalSource {
    pub fn new(root: impl Into<PathBuf>, opts: DiscoverOptions) -> Result<Self> {
        let root: PathBuf = root.into();
        let root = root.canonicalize().unwrap_or(root);
        if !root.is_dir() {
            bail!("root path is not a directory: {}", root.display());
        }
        Ok(Self { root, opts })
    }
}

impl Source for LocalSource {
    fn root(&self) -> &Path {
        &self.root
    }

    fn discover(&self) -> Result<Vec<SourceFile>> {
        discover_files(&self.root, &self.opts)
    }
}

/// A remote repository after the preparation step: just a LocalSource rooted
/// at the checkout. Fetching/cloning is the caller's concern.
pub struct RemoteSource {
    url: String,
    inner: LocalSource,
}

impl RemoteSource {
    pub fn prepared(url: impl Into<String>, checkout: impl Into<PathBuf>, opts: DiscoverOptions) -> Result<Self> {
        let url = url.into();
        let checkout: PathBuf = checkout.into();
        if !checkout.is_dir() {
            bail!("remote checkout for {} not prepared at {}", url, checkout.display());
        }
        Ok(Self {
            url,
            inner: LocalSource::new(checkout, opts)?,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Source for RemoteSource {
    fn root(&self) -> &Path {
        self.inner.root()
    }

    fn discover(&self) -> Result<Vec<SourceFile>> {
        self.inner.discover()
    }
}

/// `https://github.com/owner/repo(.git)` → `<cache>/repos/owner/repo`.
pub fn checkout_dir_for(cache_root: &Path, url: &str) -> Result<PathBuf> {
    let trimmed = url
        .trim_end_matches('/')
        .trim_end_matches(".git");
    let mut parts = trimmed.rsplit('/');
    let repo = parts.next().unwrap_or_default();
    let owner = parts.next().unwrap_or_default();
    if repo.is_empty() || owner.is_empty() || owner.contains(':') {
        bail!("cannot derive owner/repo from url: {url}");
    }
    Ok(cache_root.join("repos").join(owner).join(repo))
}

/* ------------------------------- discovery ------------------------------- */

fn discover_files(root: &Path, opts: &DiscoverOptions) -> Result<Vec<SourceFile>> {
    // Root ignore: fixed default globs + user excludes + the root ignore file.
    // Nested .gitignore files are handled by the walker itself, scoped to
    // their own subtree.
    let mut gitignore = GitignoreBuilder::new(root);
    if root.join(".gitignore").exists() {
        gitignore.add(root.join(".gitignore"));
    }
    for glob in DEFAULT_IGNORE_GLOBS {
        gitignore.add_line(None, glob)?;
    }
    for glob in &opts.excludes {
        gitignore
            .add_line(None, glob)
            .with_context(|| format!("bad exclude glob: {glob}"))?;
    }
    let root_ignore = gitignore.build()?;

    let mut walker = WalkBuilder::new(root);
    walker
        .standard_filters(false)
        .hidden(false)
        .git_ignore(true) // nested .gitignore files, per-directory scope
        .require_git(false)
        .git_global(false)
        .git_exclude(false)
        .parents(false)
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !(entry.file_type().map(|t| t.is_dir()).unwrap_or(false)
                && SKIP_DIRS.contains(&name.as_ref()))
        });

    if !opts.includes.is_empty() {
        let mut ov = OverrideBuilder::new(root);
        for glob in &opts.includes {
            ov.add(glob)
                .with_context(|| format!("bad include glob: {glob}"))?;
        }
        walker.overrides(ov.build()?);
    }

    let mut files = Vec::new();
    for dent in walker.build().filter_map(|e| e.ok()) {
        let path = dent.path();
        if !path.is_file() {
            continue;
        }
        let rel_path = util::normalize_rel(root, path);
        if root_ignore.matched(&rel_path, false).is_ignore() {
            continue;
        }
        if has_binary_ext(path) {
            continue;
        }

        let meta = match dent.metadata() {
            Ok(m) => m,
            Err(_) => continue,
        };
        let size = meta.len();
        if size == 0 {
            continue;
        }
        if !opts.force_large && size > MAX_FILE_BYTES {
            continue;
        }

        // Unreadable or non-UTF-8 files are silently skipped, never fatal.
        match read_source_file(path, &rel_path, size, &meta, opts.force_large) {
            Ok(Some(sf)) => files.push(sf),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable file");
            }
        }
    }
    Ok(files)
}

fn read_source_file(
    path: &Path,
    rel_path: &str,
    size: u64,
    meta: &fs::Metadata,
    force_large: bool,
) -> Result<Option<SourceFile>> {
    if is_probably_binary(path)? {
        return Ok(None);
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("read {}", path.display()))?;
    if !force_large && content.lines().count() > MAX_FILE_LINES {
        return Ok(None);
    }

    let lang = detect_lang(path, &content);
    Ok(Some(SourceFile {
        path: path.to_path_buf(),
        rel_path: rel_path.to_string(),
        content,
        lang,
        size,
        mtime: util::to_unix_epoch(meta),
    }))
}

fn has_binary_ext(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| BINARY_EXTS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn is_probably_binary(path: &Path) -> Result<bool> {
    let mut f = fs::File::open(path)?;
    let mut buf = [0u8; BINARY_SNIFF_BYTES];
    let n = f.read(&mut buf)?;
    Ok(memchr::memchr(0, &buf[..n]).is_some())
}

/* --------------------------- language detection --------------------------- */

/// Extension first, shebang for extensionless scripts, `text` otherwise.
pub fn detect_lang(path: &Path, content: &str) -> String {
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        return ext_to_lang(ext).to_string();
    }
    let first = content.lines().next().unwrap_or("").trim_start();
    if first.starts_with("#!") {
        if first.contains("python") { return "python".into(); }
        if first.contains("node") { return "javascript".into(); }
        if first.contains("bash") || first.contains("sh") { return "shell".into(); }
    }
    "text".into()
}

pub fn ext_to_lang(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "py" | "pyi" => "python",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "javascriptreact",
        "ts" | "mts" | "cts" => "typescript",
        "tsx" => "typescriptreact",
        "go" => "go",
        "rs" => "rust",
        "rb" => "ruby",
        "php" => "php",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "scala" => "scala",
        "swift" => "swift",
        "cs" => "csharp",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx" => "cpp",
        "md" | "markdown" => "markdown",
        "mdx" => "mdx",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "html" | "htm" => "html",
        "css" | "scss" | "less" => "css",
        "sh" | "bash" | "zsh" => "shell",
        "sql" => "sql",
        _ => "text",
    }
}

/* ----------------------------------- tests ----------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, content).unwrap();
    }

    fn discover(root: &Path, opts: DiscoverOptions) -> Vec<String> {
        let src = LocalSource::new(root, opts).unwrap();
        let mut rels: Vec<String> = src.discover().unwrap().into_iter().map(|f| f.rel_path).collect();
        rels.sort();
        rels
    }

    #[test]
    fn walks_and_tags_languages() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/main.py", "def main():\n    pass\n");
        write(dir.path(), "README.nfo", "hello\n");

        let src = LocalSource::new(dir.path(), DiscoverOptions::default()).unwrap();
        let files = src.discover().unwrap();
        let py = files.iter().find(|f| f.rel_path == "src/main.py").unwrap();
        assert_eq!(py.lang, "python");
        let nfo = files.iter().find(|f| f.rel_path == "README.nfo").unwrap();
        assert_eq!(nfo.lang, "text");
    }

    #[test]
    fn skips_infra_dirs_and_binaries() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "node_modules/pkg/index.js", "x\n");
        write(dir.path(), ".git/config", "x\n");
        write(dir.path(), "logo.png", "not really a png\n");
        write(dir.path(), "app.js", "console.log(1)\n");

        assert_eq!(discover(dir.path(), DiscoverOptions::default()), vec!["app.js"]);
    }

    #[test]
    fn nested_gitignore_scopes_to_subtree() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "sub/.gitignore", "secret.txt\n");
        write(dir.path(), "sub/secret.txt", "hidden\n");
        write(dir.path(), "sub/kept.txt", "kept\n");
        write(dir.path(), "secret.txt", "visible at root\n");

        let rels = discover(dir.path(), DiscoverOptions::default());
        assert!(rels.contains(&"secret.txt".to_string()));
        assert!(rels.contains(&"sub/kept.txt".to_string()));
        assert!(!rels.iter().any(|r| r == "sub/secret.txt"));
    }

    #[test]
    fn include_and_exclude_globs() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.py", "x = 1\n");
        write(dir.path(), "b.js", "let x = 1\n");
        write(dir.path(), "c.py", "x = 2\n");

        let only_py = discover(
            dir.path(),
            DiscoverOptions { includes: vec!["*.py".into()], ..Default::default() },
        );
        assert_eq!(only_py, vec!["a.py", "c.py"]);

        let no_c = discover(
            dir.path(),
            DiscoverOptions { excludes: vec!["c.py".into()], ..Default::default() },
        );
        assert_eq!(no_c, vec!["a.py", "b.js"]);
    }

    #[test]
    fn size_gate_lifts_with_force_large() {
        let dir = TempDir::new().unwrap();
        let long: String = (0..25_000).map(|i| format!("line {i}\n")).collect();
        write(dir.path(), "big.txt", &long);

        assert!(discover(dir.path(), DiscoverOptions::default()).is_empty());
        let forced = discover(
            dir.path(),
            DiscoverOptions { force_large: true, ..Default::default() },
        );
        assert_eq!(forced, vec!["big.txt"]);
    }

    #[test]
    fn nul_bytes_mean_binary() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("blob.dat"), b"ab\x00cd").unwrap();
        assert!(discover(dir.path(), DiscoverOptions::default()).is_empty());
    }

    #[test]
    fn remote_wraps_prepared_checkout() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "lib.rs", "pub fn f() {}\n");
        let src = RemoteSource::prepared(
            "https://github.com/acme/widgets",
            dir.path(),
            DiscoverOptions::default(),
        )
        .unwrap();
        assert_eq!(src.discover().unwrap().len(), 1);

        let missing = RemoteSource::prepared(
            "https://github.com/acme/widgets",
            dir.path().join("nope"),
            DiscoverOptions::default(),
        );
        assert!(missing.is_err());
    }

    #[test]
    fn checkout_dir_parses_owner_repo() {
        let cache = Path::new("/tmp/cache");
        let got = checkout_dir_for(cache, "https://github.com/acme/widgets.git").unwrap();
        assert_eq!(got, cache.join("repos/acme/widgets"));
        assert!(checkout_dir_for(cache, "https://github.com").is_err());
    }
}
