//! On-disk cache of complete model answers.
//!
//! Each entry is one file named by the hex SHA-256 of the request parameters
//! that determine the answer. Entries beyond the configured maximum are evicted
//! oldest-modified first.

use std::io::Write;
use std::pin::Pin;
use std::sync::Arc;
use std::time::SystemTime;

use futures::Stream;
use futures::stream;
use serde::Serialize;
use sha2::{Digest, Sha256};
use utf8path::Path;

use crate::completion::{Completer, CompletionRequest, TextStream, Trace};
use crate::error::{Error, Result};
use crate::observability::{CACHE_ERRORS, CACHE_EVICTIONS, CACHE_HITS, CACHE_MISSES, CACHE_WRITES};
use crate::types::{ChatMessage, ToolParam};

/// The fields of a request that determine the answer, in hashing order.
#[derive(Serialize)]
struct CacheKey<'a> {
    messages: &'a [ChatMessage],
    model: &'a str,
    temperature: f32,
    top_p: f32,
    functions: &'a Option<Vec<ToolParam>>,
}

/// A directory of cached answers.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    dir: Path<'static>,
    max_entries: usize,
}

impl ResponseCache {
    /// Open (creating if needed) the cache rooted at `dir`.
    pub fn new(dir: &Path, max_entries: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|err| Error::cache(format!("failed to create {}", dir.as_str()), Some(err)))?;
        Ok(Self {
            dir: dir.clone().into_owned(),
            max_entries,
        })
    }

    /// Where the entries live.
    pub fn dir(&self) -> &Path<'static> {
        &self.dir
    }

    /// The cache key of `request`.
    ///
    /// Covers messages, model, temperature, top-p and the offered functions. The
    /// caching flag itself is not part of the key.
    pub fn key(request: &CompletionRequest) -> Result<String> {
        let key = CacheKey {
            messages: &request.messages,
            model: &request.model,
            temperature: request.temperature,
            top_p: request.top_p,
            functions: &request.functions,
        };
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(&key)?);
        Ok(format!("{:x}", hasher.finalize()))
    }

    fn entry(&self, key: &str) -> Path<'static> {
        self.dir.join(key).into_owned()
    }

    /// The cached answer for `key`, if any.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.entry(key);
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::cache(format!("failed to read {}", path.as_str()), Some(err))),
        }
    }

    /// Record `text` as the answer for `key`, then evict down to the maximum.
    pub fn put(&self, key: &str, text: &str) -> Result<()> {
        let path = self.entry(key);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|err| Error::cache(format!("failed to stage {}", path.as_str()), Some(err)))?;
        tmp.write_all(text.as_bytes())
            .map_err(|err| Error::cache(format!("failed to write {}", path.as_str()), Some(err)))?;
        tmp.persist(&path)
            .map_err(|err| Error::cache(format!("failed to persist {}", path.as_str()), Some(err.error)))?;
        CACHE_WRITES.click();
        self.evict()
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> Result<usize> {
        Ok(self.entries()?.len())
    }

    /// True if nothing is cached.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn entries(&self) -> Result<Vec<(SystemTime, Path<'static>)>> {
        let mut entries = Vec::new();
        let read_dir = std::fs::read_dir(&self.dir)
            .map_err(|err| Error::cache(format!("failed to list {}", self.dir.as_str()), Some(err)))?;
        for dirent in read_dir {
            let dirent =
                dirent.map_err(|err| Error::cache(format!("failed to list {}", self.dir.as_str()), Some(err)))?;
            let name = dirent.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            // Staging files from in-flight writes start with a dot.
            if name.starts_with('.') {
                continue;
            }
            let metadata = match dirent.metadata() {
                Ok(metadata) => metadata,
                // Lost a race with another eviction.
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => {
                    return Err(Error::cache(format!("failed to stat {name}"), Some(err)));
                }
            };
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            entries.push((modified, self.dir.join(name).into_owned()));
        }
        Ok(entries)
    }

    fn evict(&self) -> Result<()> {
        let mut entries = self.entries()?;
        if entries.len() <= self.max_entries {
            return Ok(());
        }
        entries.sort_by(|lhs, rhs| lhs.0.cmp(&rhs.0).then_with(|| lhs.1.as_str().cmp(rhs.1.as_str())));
        let excess = entries.len() - self.max_entries;
        for (_, path) in entries.into_iter().take(excess) {
            match std::fs::remove_file(&path) {
                Ok(()) => CACHE_EVICTIONS.click(),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(Error::cache(format!("failed to evict {}", path.as_str()), Some(err)));
                }
            }
        }
        Ok(())
    }
}

////////////////////////////////////////// CachingCompleter //////////////////////////////////////////

/// A [`Completer`] that answers from, and records into, a [`ResponseCache`].
pub struct CachingCompleter<C> {
    inner: C,
    cache: Arc<ResponseCache>,
}

impl<C: Completer> CachingCompleter<C> {
    /// Wrap `inner` with `cache`.
    pub fn new(inner: C, cache: Arc<ResponseCache>) -> Self {
        Self { inner, cache }
    }

    /// The wrapped completer.
    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait::async_trait]
impl<C: Completer> Completer for CachingCompleter<C> {
    async fn complete(&self, request: CompletionRequest) -> Result<TextStream> {
        if !request.caching {
            return self.inner.complete(request).await;
        }
        let key = ResponseCache::key(&request)?;
        match self.cache.get(&key) {
            Ok(Some(text)) => {
                CACHE_HITS.click();
                tracing::debug!(key = %key, "answering from cache");
                return Ok(Box::pin(stream::once(async move { Ok(text) })));
            }
            Ok(None) => {
                CACHE_MISSES.click();
            }
            Err(err) => {
                CACHE_ERRORS.click();
                tracing::warn!(error = %err, "cache lookup failed; treating as a miss");
            }
        }
        let trace = Arc::clone(&request.trace);
        let upstream = self.inner.complete(request).await?;
        Ok(Box::pin(CachingStream::new(
            upstream,
            Arc::clone(&self.cache),
            key,
            trace,
        )))
    }
}

/////////////////////////////////////////// CachingStream ///////////////////////////////////////////

/// Passes text through while accumulating it, and records the whole answer
/// once the inner stream ends cleanly.
///
/// Answers for which the `trace` shows a function call are not recorded.
/// Neither are answers cut short by an error or by dropping the stream early.
pub struct CachingStream {
    inner: TextStream,
    cache: Arc<ResponseCache>,
    key: String,
    trace: Arc<Trace>,
    text: String,
    failed: bool,
    done: bool,
}

impl CachingStream {
    /// Wrap `inner`, recording under `key` in `cache`.
    pub fn new(
        inner: TextStream,
        cache: Arc<ResponseCache>,
        key: String,
        trace: Arc<Trace>,
    ) -> Self {
        Self {
            inner,
            cache,
            key,
            trace,
            text: String::new(),
            failed: false,
            done: false,
        }
    }

    fn record(&mut self) -> Result<()> {
        if self.failed || self.trace.function_calls() > 0 {
            return Ok(());
        }
        self.cache.put(&self.key, &self.text)
    }
}

impl Stream for CachingStream {
    type Item = Result<String>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        if self.done {
            return std::task::Poll::Ready(None);
        }
        match self.inner.as_mut().poll_next(cx) {
            std::task::Poll::Ready(Some(Ok(text))) => {
                self.text.push_str(&text);
                std::task::Poll::Ready(Some(Ok(text)))
            }
            std::task::Poll::Ready(Some(Err(e))) => {
                self.failed = true;
                std::task::Poll::Ready(Some(Err(e)))
            }
            std::task::Poll::Ready(None) => {
                self.done = true;
                match self.record() {
                    Ok(()) => std::task::Poll::Ready(None),
                    Err(err) => {
                        CACHE_ERRORS.click();
                        std::task::Poll::Ready(Some(Err(err)))
                    }
                }
            }
            std::task::Poll::Pending => std::task::Poll::Pending,
        }
    }
}
