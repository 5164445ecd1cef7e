//! Bundle transports.
//!
//! A bundle is a manifest plus a set of exports addressed by
//! `module.export`. Exports are JSON documents; their decoded value becomes
//! the [`CodeValue`] of the code reference that names them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde_json::Value;

use super::descriptor::RemoteDescriptor;
use crate::error::FetchError;
use crate::extension::{CodeRefSpec, CodeValue};

/// Manifest file name inside a bundle location.
pub const MANIFEST_FILE: &str = "plugin-manifest.json";
/// Directory holding `<module>/<export>.json` files.
pub const EXPORTS_DIR: &str = "exports";
/// Location prefix served by a [`StaticFetcher`] behind a [`SchemeFetcher`].
pub const BUILTIN_SCHEME: &str = "builtin://";

/// Fetches manifests and exports of remote bundles.
#[async_trait]
pub trait ManifestFetcher: Send + Sync {
    /// Raw manifest bytes. The loader checks integrity before parsing.
    async fn fetch_manifest(&self, descriptor: &RemoteDescriptor) -> Result<Vec<u8>, FetchError>;

    async fn fetch_export(
        &self,
        descriptor: &RemoteDescriptor,
        spec: &CodeRefSpec,
    ) -> Result<CodeValue, FetchError>;
}

/// Export addresses become path segments; reject any that would leave
/// the bundle's export tree.
fn ensure_contained(spec: &CodeRefSpec) -> Result<(), FetchError> {
    if spec.is_contained() {
        Ok(())
    } else {
        Err(FetchError::OutsideBundle(spec.to_string()))
    }
}

/// Fetches bundles over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("plugport/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Http(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn url(location: &str, path: &str) -> String {
        format!("{}/{}", location.trim_end_matches('/'), path)
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        tracing::debug!(url = %url, "Fetching bundle resource");
        let response = self.client.get(url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(FetchError::NotFound(url.to_string())),
            status if !status.is_success() => Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            }),
            _ => Ok(response),
        }
    }
}

#[async_trait]
impl ManifestFetcher for HttpFetcher {
    async fn fetch_manifest(&self, descriptor: &RemoteDescriptor) -> Result<Vec<u8>, FetchError> {
        let url = Self::url(&descriptor.location, MANIFEST_FILE);
        let bytes = self.get(&url).await?.bytes().await?;
        Ok(bytes.to_vec())
    }

    async fn fetch_export(
        &self,
        descriptor: &RemoteDescriptor,
        spec: &CodeRefSpec,
    ) -> Result<CodeValue, FetchError> {
        ensure_contained(spec)?;
        let path = format!("{EXPORTS_DIR}/{}/{}.json", spec.module, spec.export);
        let url = Self::url(&descriptor.location, &path);
        let value: Value = self.get(&url).await?.json().await?;
        Ok(CodeValue::from_json(value))
    }
}

/// Reads bundles from the local filesystem.
///
/// Locations may be `file://` URLs or paths; relative paths are taken from
/// the fetcher's root.
#[derive(Debug, Clone, Default)]
pub struct FileFetcher {
    root: Option<PathBuf>,
}

impl FileFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn bundle_dir(&self, location: &str) -> PathBuf {
        let path = Path::new(location.strip_prefix("file://").unwrap_or(location));
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    async fn read(path: &Path) -> Result<Vec<u8>, FetchError> {
        tokio::fs::read(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FetchError::NotFound(path.display().to_string()),
            _ => FetchError::from(e),
        })
    }
}

#[async_trait]
impl ManifestFetcher for FileFetcher {
    async fn fetch_manifest(&self, descriptor: &RemoteDescriptor) -> Result<Vec<u8>, FetchError> {
        let path = self.bundle_dir(&descriptor.location).join(MANIFEST_FILE);
        Self::read(&path).await
    }

    async fn fetch_export(
        &self,
        descriptor: &RemoteDescriptor,
        spec: &CodeRefSpec,
    ) -> Result<CodeValue, FetchError> {
        ensure_contained(spec)?;
        let path = self
            .bundle_dir(&descriptor.location)
            .join(EXPORTS_DIR)
            .join(&spec.module)
            .join(format!("{}.json", spec.export));
        let bytes = Self::read(&path).await?;
        let value: Value = serde_json::from_slice(&bytes)?;
        Ok(CodeValue::from_json(value))
    }
}

#[derive(Debug, Default)]
struct StaticBundle {
    manifest: Vec<u8>,
    exports: HashMap<CodeRefSpec, CodeValue>,
}

/// In-memory bundles keyed by location, for built-in plugins and tests.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    bundles: RwLock<HashMap<String, StaticBundle>>,
    latency: Option<Duration>,
    manifest_fetches: AtomicUsize,
    export_fetches: AtomicUsize,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every fetch, to make loads observable while in flight.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Install or replace the manifest at `location`. Exports are kept.
    pub fn insert_bundle(&self, location: impl Into<String>, manifest: impl Into<Vec<u8>>) {
        self.bundles.write().entry(location.into()).or_default().manifest = manifest.into();
    }

    pub fn insert_manifest_json(&self, location: impl Into<String>, manifest: &Value) {
        self.insert_bundle(location, manifest.to_string());
    }

    pub fn insert_export(&self, location: impl Into<String>, spec: CodeRefSpec, value: CodeValue) {
        self.bundles
            .write()
            .entry(location.into())
            .or_default()
            .exports
            .insert(spec, value);
    }

    pub fn remove(&self, location: &str) -> bool {
        self.bundles.write().remove(location).is_some()
    }

    pub fn manifest_fetches(&self) -> usize {
        self.manifest_fetches.load(Ordering::SeqCst)
    }

    pub fn export_fetches(&self) -> usize {
        self.export_fetches.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ManifestFetcher for StaticFetcher {
    async fn fetch_manifest(&self, descriptor: &RemoteDescriptor) -> Result<Vec<u8>, FetchError> {
        self.manifest_fetches.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        self.bundles
            .read()
            .get(&descriptor.location)
            .filter(|bundle| !bundle.manifest.is_empty())
            .map(|bundle| bundle.manifest.clone())
            .ok_or_else(|| FetchError::NotFound(descriptor.location.clone()))
    }

    async fn fetch_export(
        &self,
        descriptor: &RemoteDescriptor,
        spec: &CodeRefSpec,
    ) -> Result<CodeValue, FetchError> {
        self.export_fetches.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        self.bundles
            .read()
            .get(&descriptor.location)
            .and_then(|bundle| bundle.exports.get(spec).cloned())
            .ok_or_else(|| FetchError::NotFound(format!("{}#{spec}", descriptor.location)))
    }
}

/// Dispatches on the location scheme: `http(s)://` goes to HTTP,
/// `builtin://` to an in-memory fetcher, anything else to the filesystem.
pub struct SchemeFetcher {
    http: HttpFetcher,
    file: FileFetcher,
    builtin: Arc<StaticFetcher>,
}

impl SchemeFetcher {
    pub fn new(http: HttpFetcher, file: FileFetcher) -> Self {
        Self {
            http,
            file,
            builtin: Arc::new(StaticFetcher::new()),
        }
    }

    pub fn with_builtin(mut self, builtin: Arc<StaticFetcher>) -> Self {
        self.builtin = builtin;
        self
    }

    fn route(&self, location: &str) -> &dyn ManifestFetcher {
        if location.starts_with("http://") || location.starts_with("https://") {
            &self.http
        } else if location.starts_with(BUILTIN_SCHEME) {
            self.builtin.as_ref()
        } else {
            &self.file
        }
    }
}

#[async_trait]
impl ManifestFetcher for SchemeFetcher {
    async fn fetch_manifest(&self, descriptor: &RemoteDescriptor) -> Result<Vec<u8>, FetchError> {
        self.route(&descriptor.location).fetch_manifest(descriptor).await
    }

    async fn fetch_export(
        &self,
        descriptor: &RemoteDescriptor,
        spec: &CodeRefSpec,
    ) -> Result<CodeValue, FetchError> {
        self.route(&descriptor.location)
            .fetch_export(descriptor, spec)
            .await
    }
}
