use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crawlkit_core::{
    Committer, CrawlRecord, CrawlerPlugin, Document, ErrorKind, ImporterResponse, PluginError,
    Reference, State,
};

/// A trivial filesystem-backed [`CrawlerPlugin`] (spec §1's "specialization
/// that plugs fetch logic into the pipeline"): references are paths
/// relative to `root`, "importing" hashes the file's bytes, and
/// "committing" appends a line to a JSONL manifest under the work
/// directory. This is the engine's smoke-test harness, not a crawler
/// product in its own right.
pub struct FsCrawlerPlugin {
    root: PathBuf,
    manifest_path: PathBuf,
}

impl FsCrawlerPlugin {
    pub fn new(root: PathBuf, manifest_path: PathBuf) -> Self {
        Self { root, manifest_path }
    }

    /// Walk `root` recursively and return every regular file as a seed
    /// reference, relative to `root` so references are stable across runs.
    pub fn discover_seeds(&self) -> std::io::Result<Vec<Reference>> {
        let mut seeds = Vec::new();
        walk(&self.root, &self.root, &mut seeds)?;
        seeds.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(seeds)
    }

    /// Append one JSONL `line` to the manifest, off the async runtime
    /// (mirrors `CrawlDataStore`'s `spawn_blocking` + append pattern).
    async fn append_manifest_line(&self, line: String) -> Result<(), PluginError> {
        let path = self.manifest_path.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            use std::io::Write;
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            let mut file = std::fs::OpenOptions::new().create(true).append(true).open(&path)?;
            writeln!(file, "{line}")
        })
        .await
        .map_err(|e| PluginError::new(ErrorKind::Io, format!("manifest join error: {e}")))?
        .map_err(|e| PluginError::new(ErrorKind::Commit, format!("manifest write failed: {e}")))
    }
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<Reference>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk(root, &path, out)?;
        } else if path.is_file() {
            let rel = path.strip_prefix(root).unwrap_or(&path);
            out.push(Reference::new(rel.to_string_lossy().into_owned()));
        }
    }
    Ok(())
}

fn guess_content_type(reference: &Reference) -> Option<String> {
    let ext = Path::new(reference.as_str()).extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "txt" | "md" => "text/plain",
        "json" => "application/json",
        "html" | "htm" => "text/html",
        "xml" => "application/xml",
        _ => return None,
    };
    Some(mime.to_string())
}

#[async_trait]
impl Committer for FsCrawlerPlugin {
    async fn upsert(&self, reference: &Reference, doc: &Document) -> Result<(), PluginError> {
        let line = serde_json::json!({
            "op": "upsert",
            "reference": reference.as_str(),
            "metadata": doc.metadata,
        });
        self.append_manifest_line(line.to_string()).await
    }

    async fn remove(
        &self,
        reference: &Reference,
        metadata: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), PluginError> {
        let line = serde_json::json!({
            "op": "remove",
            "reference": reference.as_str(),
            "metadata": metadata,
        });
        self.append_manifest_line(line.to_string()).await
    }

    async fn commit(&self) -> Result<(), PluginError> {
        // The manifest is written line-by-line with no buffering to flush;
        // nothing to do here beyond satisfying the contract.
        Ok(())
    }
}

#[async_trait]
impl CrawlerPlugin for FsCrawlerPlugin {
    async fn execute_importer_pipeline(
        &self,
        current: &CrawlRecord,
        _cached: Option<&CrawlRecord>,
        _doc: &Document,
    ) -> Result<Option<ImporterResponse>, PluginError> {
        let path = self.root.join(current.reference.as_str());
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| PluginError::new(ErrorKind::Fetch, format!("read {}: {e}", path.display())))?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let content_checksum = format!("{:x}", hasher.finalize());

        let mut meta_hasher = Sha256::new();
        meta_hasher.update(current.reference.as_str().as_bytes());
        meta_hasher.update(bytes.len().to_le_bytes());
        let meta_checksum = format!("{:x}", meta_hasher.finalize());

        let mut response = ImporterResponse::success();
        response.content_checksum = Some(content_checksum);
        response.meta_checksum = Some(meta_checksum);
        response.content_type = guess_content_type(&current.reference);
        Ok(Some(response))
    }

    async fn execute_committer_pipeline(
        &self,
        current: &mut CrawlRecord,
        cached: Option<&CrawlRecord>,
        doc: &Document,
    ) -> Result<(), PluginError> {
        current.state = Some(match cached {
            None => State::New,
            Some(cached) if cached.content_checksum == current.content_checksum => State::Unmodified,
            Some(_) => State::Modified,
        });
        self.upsert(&current.reference, doc).await
    }

    fn committer(&self) -> Option<&dyn Committer> {
        Some(self)
    }
}
