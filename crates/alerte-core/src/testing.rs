//! In-process stand-ins for the host seams, shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::agent::Lifecycle;
use crate::clients::{ClientQuery, Clients, WindowClient};
use crate::error::{HostError, NetworkError, StorageError};
use crate::fetch::Fetcher;
use crate::notifications::{NotificationOptions, Notifier};
use crate::request::{CachedEntry, Request, RequestKey, Response};
use crate::storage::{CacheStorage, MemoryStorage};

/// Fetcher answering from a table of canned responses. Unknown URLs and URLs
/// marked with `fail` are unreachable.
#[derive(Clone, Default)]
pub struct StubFetcher {
    routes: Arc<Mutex<HashMap<String, Option<Response>>>>,
    calls: Arc<AtomicUsize>,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: &str, response: Response) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Some(response));
    }

    pub fn fail(&self, url: &str) {
        self.routes.lock().unwrap().insert(url.to_string(), None);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn reset_calls(&self) {
        self.calls.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let route = self.routes.lock().unwrap().get(&request.url).cloned();
        route
            .flatten()
            .ok_or_else(|| NetworkError::Unreachable(request.url.clone()))
    }
}

/// Memory storage whose `delete` fails for one generation.
pub struct FlakyDeleteStorage {
    inner: MemoryStorage,
    broken: String,
}

impl FlakyDeleteStorage {
    pub fn new(inner: MemoryStorage, broken: &str) -> Self {
        Self {
            inner,
            broken: broken.to_string(),
        }
    }
}

#[async_trait]
impl CacheStorage for FlakyDeleteStorage {
    async fn generations(&self) -> Result<Vec<String>, StorageError> {
        self.inner.generations().await
    }

    async fn open(&self, generation: &str) -> Result<(), StorageError> {
        self.inner.open(generation).await
    }

    async fn put(
        &self,
        generation: &str,
        key: &RequestKey,
        entry: CachedEntry,
    ) -> Result<(), StorageError> {
        self.inner.put(generation, key, entry).await
    }

    async fn lookup(
        &self,
        generation: &str,
        key: &RequestKey,
    ) -> Result<Option<CachedEntry>, StorageError> {
        self.inner.lookup(generation, key).await
    }

    async fn keys(&self, generation: &str) -> Result<Vec<RequestKey>, StorageError> {
        self.inner.keys(generation).await
    }

    async fn delete(&self, generation: &str) -> Result<bool, StorageError> {
        if generation == self.broken {
            return Err(StorageError::io(
                format!("delete generation {}", generation),
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked"),
            ));
        }
        self.inner.delete(generation).await
    }
}

/// Memory storage whose `put` fails once `limit` entries have been stored,
/// leaving the earlier ones in place.
#[derive(Clone)]
pub struct FlakyPutStorage {
    inner: MemoryStorage,
    limit: usize,
    puts: Arc<AtomicUsize>,
}

impl FlakyPutStorage {
    pub fn new(inner: MemoryStorage, limit: usize) -> Self {
        Self {
            inner,
            limit,
            puts: Arc::default(),
        }
    }

    /// Entries stored so far.
    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheStorage for FlakyPutStorage {
    async fn generations(&self) -> Result<Vec<String>, StorageError> {
        self.inner.generations().await
    }

    async fn open(&self, generation: &str) -> Result<(), StorageError> {
        self.inner.open(generation).await
    }

    async fn put(
        &self,
        generation: &str,
        key: &RequestKey,
        entry: CachedEntry,
    ) -> Result<(), StorageError> {
        if self.puts() >= self.limit {
            return Err(StorageError::io(
                format!("write body of {}", key),
                std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            ));
        }
        self.inner.put(generation, key, entry).await?;
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn lookup(
        &self,
        generation: &str,
        key: &RequestKey,
    ) -> Result<Option<CachedEntry>, StorageError> {
        self.inner.lookup(generation, key).await
    }

    async fn keys(&self, generation: &str) -> Result<Vec<RequestKey>, StorageError> {
        self.inner.keys(generation).await
    }

    async fn delete(&self, generation: &str) -> Result<bool, StorageError> {
        self.inner.delete(generation).await
    }
}

/// Notifier that records every call and models tag replacement.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    shown: Arc<Mutex<Vec<(String, NotificationOptions)>>>,
    visible: Arc<Mutex<HashMap<String, String>>>,
    closed: Arc<Mutex<Vec<String>>>,
    reject_close: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting_close() -> Self {
        Self {
            reject_close: true,
            ..Self::default()
        }
    }

    pub fn shown(&self) -> Vec<(String, NotificationOptions)> {
        self.shown.lock().unwrap().clone()
    }

    pub fn visible_with_tag(&self, tag: &str) -> usize {
        usize::from(self.visible.lock().unwrap().contains_key(tag))
    }

    pub fn closed(&self) -> Vec<String> {
        self.closed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn show(&self, title: &str, options: &NotificationOptions) -> Result<(), HostError> {
        self.shown
            .lock()
            .unwrap()
            .push((title.to_string(), options.clone()));
        self.visible
            .lock()
            .unwrap()
            .insert(options.tag.clone(), title.to_string());
        Ok(())
    }

    async fn close(&self, tag: &str) -> Result<(), HostError> {
        if self.reject_close {
            return Err(HostError::rejected("close notification", "already gone"));
        }
        self.visible.lock().unwrap().remove(tag);
        self.closed.lock().unwrap().push(tag.to_string());
        Ok(())
    }
}

#[derive(Clone)]
pub struct FakeClients {
    windows: Arc<Vec<WindowClient>>,
    can_open: bool,
    queries: Arc<Mutex<Vec<ClientQuery>>>,
    focused: Arc<Mutex<Vec<String>>>,
    opened: Arc<Mutex<Vec<String>>>,
    claims: Arc<AtomicUsize>,
}

impl FakeClients {
    pub fn with_windows(windows: Vec<WindowClient>) -> Self {
        Self {
            windows: Arc::new(windows),
            can_open: true,
            queries: Arc::default(),
            focused: Arc::default(),
            opened: Arc::default(),
            claims: Arc::default(),
        }
    }

    pub fn without_open_window(mut self) -> Self {
        self.can_open = false;
        self
    }

    pub fn queries(&self) -> Vec<ClientQuery> {
        self.queries.lock().unwrap().clone()
    }

    pub fn focused(&self) -> Vec<String> {
        self.focused.lock().unwrap().clone()
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    pub fn claim_calls(&self) -> usize {
        self.claims.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Clients for FakeClients {
    async fn match_all(&self, query: ClientQuery) -> Result<Vec<WindowClient>, HostError> {
        self.queries.lock().unwrap().push(query);
        Ok(self.windows.as_ref().clone())
    }

    async fn focus(&self, id: &str) -> Result<(), HostError> {
        if !self.windows.iter().any(|w| w.id == id) {
            return Err(HostError::UnknownClient(id.to_string()));
        }
        self.focused.lock().unwrap().push(id.to_string());
        Ok(())
    }

    fn can_open_windows(&self) -> bool {
        self.can_open
    }

    async fn open_window(&self, url: &str) -> Result<(), HostError> {
        self.opened.lock().unwrap().push(url.to_string());
        Ok(())
    }

    async fn claim(&self) -> Result<(), HostError> {
        self.claims.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingLifecycle {
    skip_waiting: Arc<AtomicUsize>,
}

impl RecordingLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip_waiting_calls(&self) -> usize {
        self.skip_waiting.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Lifecycle for RecordingLifecycle {
    async fn skip_waiting(&self) -> Result<(), HostError> {
        self.skip_waiting.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
