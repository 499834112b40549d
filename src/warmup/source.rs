//! Warmup corpus sources.
//!
//! A corpus is a list of operations recorded from production traffic. Both
//! sources share the manifest format:
//!
//! ```json
//! { "operations": [
//!     { "request": { "query": "{ employees { id } }", "operationName": null },
//!       "client": { "name": "web", "version": "1.0" } },
//!     { "request": { "operationName": "Employees",
//!                    "extensions": { "persistedQuery": { "sha256Hash": "…", "version": 1 } } },
//!       "client": { "name": "my-client" }, "featureFlag": "myff" }
//! ] }
//! ```
//!
//! The filesystem source additionally reads `.graphql` / `.gql` files as raw
//! documents for the base graph.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::config::schema::CacheWarmupSource;
use crate::pipeline::types::{ClientInfo, GraphQLRequest};

#[derive(Debug, Error)]
pub enum WarmupError {
    #[error("no warmup source configured")]
    NoSource,

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid warmup manifest {origin}: {source}")]
    Manifest {
        origin: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to fetch warmup manifest from {url}: {message}")]
    Cdn { url: String, message: String },
}

/// What an item exercises in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmupItemKind {
    Document,
    Persisted,
}

impl fmt::Display for WarmupItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarmupItemKind::Document => f.write_str("document"),
            WarmupItemKind::Persisted => f.write_str("persisted"),
        }
    }
}

/// One operation to run through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct WarmupItem {
    pub request: GraphQLRequest,
    pub client: ClientInfo,
    /// `None` warms the base graph.
    pub feature_flag: Option<String>,
}

impl WarmupItem {
    pub fn document(query: impl Into<String>) -> Self {
        Self {
            request: GraphQLRequest::query(query),
            client: ClientInfo::default(),
            feature_flag: None,
        }
    }

    /// A request with a document is warmed as a document even if it also
    /// carries a persisted hash.
    pub fn kind(&self) -> WarmupItemKind {
        if self.request.query.is_none() && self.request.extensions.persisted_query.is_some() {
            WarmupItemKind::Persisted
        } else {
            WarmupItemKind::Document
        }
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    operations: Vec<ManifestOperation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestOperation {
    request: GraphQLRequest,
    #[serde(default)]
    client: Option<ManifestClient>,
    #[serde(default)]
    feature_flag: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ManifestClient {
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: Option<String>,
}

fn parse_manifest(bytes: &[u8], origin: impl fmt::Display) -> Result<Vec<WarmupItem>, WarmupError> {
    let manifest: Manifest = serde_json::from_slice(bytes).map_err(|source| WarmupError::Manifest {
        origin: origin.to_string(),
        source,
    })?;
    Ok(manifest
        .operations
        .into_iter()
        .map(|op| WarmupItem {
            request: op.request,
            client: op
                .client
                .map(|c| ClientInfo::new(c.name, c.version.unwrap_or_default()))
                .unwrap_or_default(),
            feature_flag: op.feature_flag.filter(|flag| !flag.is_empty()),
        })
        .collect())
}

/// Items enumerated from a source, plus the files that could not be used.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WarmupCorpus {
    pub items: Vec<WarmupItem>,
    /// Unreadable files or malformed manifests, skipped during enumeration.
    pub rejected: Vec<String>,
}

impl From<Vec<WarmupItem>> for WarmupCorpus {
    fn from(items: Vec<WarmupItem>) -> Self {
        Self {
            items,
            rejected: Vec::new(),
        }
    }
}

/// Where warmup items come from.
#[async_trait]
pub trait WarmupSource: Send + Sync {
    async fn load(&self) -> Result<WarmupCorpus, WarmupError>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Fixed list of items.
#[async_trait]
impl WarmupSource for Vec<WarmupItem> {
    async fn load(&self) -> Result<WarmupCorpus, WarmupError> {
        Ok(self.clone().into())
    }

    fn describe(&self) -> String {
        format!("{} static items", self.len())
    }
}

/// Directory tree of `.graphql` / `.gql` documents and `.json` manifests.
/// Files are read in path order; other extensions are ignored. A file that
/// cannot be read or parsed is rejected without affecting its siblings; only
/// an unreadable directory fails the load.
pub struct FilesystemSource {
    root: PathBuf,
}

impl FilesystemSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn collect_files(&self) -> Result<Vec<PathBuf>, WarmupError> {
        let mut files = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await.map_err(|source| WarmupError::Io {
                path: dir.clone(),
                source,
            })?;
            loop {
                let entry = entries.next_entry().await.map_err(|source| WarmupError::Io {
                    path: dir.clone(),
                    source,
                })?;
                let Some(entry) = entry else { break };
                let path = entry.path();
                let file_type = entry.file_type().await.map_err(|source| WarmupError::Io {
                    path: path.clone(),
                    source,
                })?;
                if file_type.is_dir() {
                    pending.push(path);
                } else {
                    files.push(path);
                }
            }
        }
        files.sort();
        Ok(files)
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

#[async_trait]
impl WarmupSource for FilesystemSource {
    async fn load(&self) -> Result<WarmupCorpus, WarmupError> {
        let mut corpus = WarmupCorpus::default();
        for path in self.collect_files().await? {
            let Some(ext) = extension(&path) else { continue };
            if !matches!(ext.as_str(), "graphql" | "gql" | "json") {
                continue;
            }
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(source) => {
                    let err = WarmupError::Io {
                        path: path.clone(),
                        source,
                    };
                    tracing::warn!(error = %err, "Skipping unreadable warmup file");
                    corpus.rejected.push(path.display().to_string());
                    continue;
                }
            };
            if ext == "json" {
                match parse_manifest(&bytes, path.display()) {
                    Ok(items) => corpus.items.extend(items),
                    Err(err) => {
                        tracing::warn!(error = %err, "Skipping malformed warmup manifest");
                        corpus.rejected.push(path.display().to_string());
                    }
                }
            } else {
                let document = String::from_utf8_lossy(&bytes);
                if document.trim().is_empty() {
                    tracing::debug!(path = %path.display(), "Skipping empty warmup document");
                    continue;
                }
                corpus.items.push(WarmupItem::document(document.into_owned()));
            }
        }
        tracing::debug!(
            root = %self.root.display(),
            items = corpus.items.len(),
            rejected = corpus.rejected.len(),
            "Loaded warmup corpus"
        );
        Ok(corpus)
    }

    fn describe(&self) -> String {
        format!("filesystem:{}", self.root.display())
    }
}

/// Manifest served over HTTP, authenticated with a bearer token.
pub struct CdnSource {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl CdnSource {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            token: token.into(),
        }
    }

    fn error(&self, message: impl fmt::Display) -> WarmupError {
        WarmupError::Cdn {
            url: self.url.clone(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl WarmupSource for CdnSource {
    async fn load(&self) -> Result<WarmupCorpus, WarmupError> {
        let mut request = self.client.get(&self.url);
        if !self.token.is_empty() {
            request = request.bearer_auth(&self.token);
        }
        let response = request.send().await.map_err(|e| self.error(e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(self.error(format!("unexpected status {}", status.as_u16())));
        }
        let body = response.bytes().await.map_err(|e| self.error(e))?;
        Ok(parse_manifest(&body, &self.url)?.into())
    }

    fn describe(&self) -> String {
        format!("cdn:{}", self.url)
    }
}

/// Build the configured source. The filesystem wins if both are set.
pub fn from_config(config: &CacheWarmupSource) -> Result<Box<dyn WarmupSource>, WarmupError> {
    if let Some(fs) = &config.filesystem {
        return Ok(Box::new(FilesystemSource::new(&fs.path)));
    }
    if let Some(cdn) = &config.cdn {
        return Ok(Box::new(CdnSource::new(&cdn.url, &cdn.token)));
    }
    Err(WarmupError::NoSource)
}
