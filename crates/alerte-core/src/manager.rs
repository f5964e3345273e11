//! Offline cache manager: the install / activate / fetch lifecycle of a
//! versioned cache.
//!
//! Exactly one generation is current. Install populates it from the manifest,
//! activation deletes every other generation, and request resolution is
//! cache-first with an offline fallback page for navigations. Content changes
//! ship as a new generation identifier; there is no revalidation.

use std::sync::Arc;

use futures::future::{join_all, try_join_all};
use reqwest::Url;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::error::{
    CleanupError, InstallError, ManifestFetchError, NetworkError, ResolveError, StorageError,
};
use crate::fetch::Fetcher;
use crate::request::{CachedEntry, Request, RequestKey, Resolved, Response, ResponseSource};
use crate::storage::CacheStorage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub generation: String,
    pub stored: usize,
}

#[derive(Debug, Default)]
pub struct ActivationReport {
    pub current: String,
    pub deleted: Vec<String>,
    pub failures: Vec<CleanupError>,
}

/// Owns the lifecycle of the versioned cache.
/// Holds no state of its own beyond configuration; everything durable lives
/// in the storage, so instances can be created per event.
#[derive(Clone)]
pub struct OfflineCacheManager {
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    origin: Url,
    generation: String,
    manifest: Vec<String>,
    fallback_path: String,
    treat_error_status_as_failure: bool,
}

impl OfflineCacheManager {
    /// Fails when the configured origin is not an absolute URL.
    pub fn new(
        config: &AgentConfig,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, NetworkError> {
        let origin = Url::parse(&config.origin)
            .map_err(|e| NetworkError::InvalidUrl(format!("{}: {}", config.origin, e)))?;
        Ok(Self {
            storage,
            fetcher,
            origin,
            generation: config.generation.clone(),
            manifest: config.manifest.clone(),
            fallback_path: config.fallback_path.clone(),
            treat_error_status_as_failure: config.treat_error_status_as_failure,
        })
    }

    pub fn generation(&self) -> &str {
        &self.generation
    }

    pub fn manifest(&self) -> &[String] {
        &self.manifest
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    /// Fetch every manifest entry, then store them all in the current
    /// generation as one batch. Nothing is written unless every fetch
    /// succeeded.
    pub async fn install(&self) -> Result<InstallReport, InstallError> {
        info!(
            generation = %self.generation,
            entries = self.manifest.len(),
            "Installing cache generation"
        );

        let fetches = self
            .manifest
            .iter()
            .map(|path| self.fetch_manifest_entry(path));
        let entries = try_join_all(fetches).await.map_err(|e| {
            warn!(generation = %self.generation, path = %e.path, error = %e.source, "Manifest fetch failed");
            e
        })?;

        let stored = entries.len();
        let existed = self.storage.generations().await?.contains(&self.generation);
        if let Err(e) = self.storage.put_all(&self.generation, entries).await {
            if !existed {
                self.discard_partial_generation().await;
            }
            return Err(e.into());
        }

        info!(generation = %self.generation, "Cache generation installed");
        Ok(InstallReport {
            generation: self.generation.clone(),
            stored,
        })
    }

    async fn fetch_manifest_entry(
        &self,
        path: &str,
    ) -> Result<(RequestKey, CachedEntry), ManifestFetchError> {
        let failed = |source| ManifestFetchError {
            path: path.to_string(),
            source,
        };
        let key = RequestKey::resolve(&self.origin, path)
            .ok_or_else(|| failed(NetworkError::InvalidUrl(path.to_string())))?;
        let response = self
            .fetcher
            .fetch(&Request::get(path))
            .await
            .map_err(failed)?;

        // Install only accepts successful responses
        if !response.is_ok() {
            return Err(failed(NetworkError::from_status(response.status, path)));
        }
        debug!(path, status = response.status, "Fetched manifest entry");
        Ok((key, CachedEntry::new(response)))
    }

    async fn discard_partial_generation(&self) {
        if let Err(e) = self.storage.delete(&self.generation).await {
            warn!(generation = %self.generation, error = %e, "Failed to discard partially installed generation");
        }
    }

    /// Delete every generation except the current one. Deletions run
    /// concurrently; failures are collected and logged, never fatal.
    pub async fn activate(&self) -> Result<ActivationReport, StorageError> {
        info!(generation = %self.generation, "Activating cache generation");

        let stale: Vec<String> = self
            .storage
            .generations()
            .await?
            .into_iter()
            .filter(|name| *name != self.generation)
            .collect();

        let outcomes = join_all(stale.iter().map(|name| async move {
            info!(generation = %name, "Deleting superseded cache generation");
            self.storage.delete(name).await
        }))
        .await;

        let mut report = ActivationReport {
            current: self.generation.clone(),
            ..ActivationReport::default()
        };
        for (generation, outcome) in stale.into_iter().zip(outcomes) {
            match outcome {
                Ok(_) => report.deleted.push(generation),
                Err(source) => {
                    warn!(generation = %generation, error = %source, "Failed to delete superseded cache generation");
                    report.failures.push(CleanupError { generation, source });
                }
            }
        }
        Ok(report)
    }

    /// Match a request against the current generation. Relative URLs are
    /// resolved against the application origin. Never touches the network.
    pub async fn lookup(&self, request: &Request) -> Result<Option<Response>, StorageError> {
        let Some(key) = request.cache_key(&self.origin) else {
            return Ok(None);
        };
        Ok(self
            .storage
            .lookup(&self.generation, &key)
            .await?
            .map(|entry| entry.response))
    }

    /// Cache first, then network, then the offline fallback page for
    /// navigations. Never writes to the cache.
    pub async fn resolve(&self, request: &Request) -> Result<Resolved, ResolveError> {
        match self.lookup(request).await {
            Ok(Some(response)) => {
                debug!(url = %request.url, "Serving from cache");
                return Ok(Resolved {
                    response,
                    source: ResponseSource::Cache,
                });
            }
            Ok(None) => {}
            Err(e) => warn!(url = %request.url, error = %e, "Cache lookup failed, trying network"),
        }

        let failure = match self.fetch_from_network(request).await {
            Ok(response) => {
                return Ok(Resolved {
                    response,
                    source: ResponseSource::Network,
                })
            }
            Err(e) => e,
        };

        if !request.is_navigation() {
            debug!(url = %request.url, error = %failure, "Network failed for sub-resource");
            return Err(ResolveError::Network(failure));
        }

        match self.lookup(&Request::get(self.fallback_path.as_str())).await {
            Ok(Some(response)) => {
                info!(url = %request.url, fallback = %self.fallback_path, error = %failure, "Network failed, serving offline page");
                Ok(Resolved {
                    response,
                    source: ResponseSource::Fallback,
                })
            }
            Ok(None) => Err(ResolveError::FallbackMissing {
                path: self.fallback_path.clone(),
                source: failure,
            }),
            Err(e) => {
                warn!(fallback = %self.fallback_path, error = %e, "Failed to read offline page");
                Err(ResolveError::FallbackMissing {
                    path: self.fallback_path.clone(),
                    source: failure,
                })
            }
        }
    }

    async fn fetch_from_network(&self, request: &Request) -> Result<Response, NetworkError> {
        let response = self.fetcher.fetch(request).await?;
        if self.treat_error_status_as_failure && !response.is_ok() {
            return Err(NetworkError::from_status(response.status, &request.url));
        }
        Ok(response)
    }
}
