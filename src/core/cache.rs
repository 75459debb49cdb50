//! In-memory translation cache

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

use crate::core::client::{HttpTranslator, Translator};
use crate::core::config::TranslatorConfig;
use crate::core::errors::Result;
use crate::core::models::UsageMetrics;

type CacheKey = (String, String, String);

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<CacheKey, String>,
    order: VecDeque<CacheKey>,
    hits: u64,
    misses: u64,
}

/// Cache statistics snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Wraps a translator and remembers its answers
///
/// Hits are reported with zero tokens, zero time and `cached = true`.
/// The oldest entry is evicted once `capacity` is reached.
#[derive(Debug)]
pub struct CachedTranslator<T> {
    inner: T,
    capacity: usize,
    state: Mutex<CacheState>,
}

impl<T: Translator> CachedTranslator<T> {
    pub fn new(inner: T, capacity: usize) -> Self {
        Self {
            inner,
            capacity,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Current statistics
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            entries: state.entries.len(),
            hits: state.hits,
            misses: state.misses,
        }
    }

    fn lookup(&self, key: &CacheKey) -> Option<String> {
        let mut state = self.state.lock();
        match state.entries.get(key).cloned() {
            Some(hit) => {
                state.hits += 1;
                Some(hit)
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    fn store(&self, key: CacheKey, translation: String) {
        if self.capacity == 0 {
            return;
        }

        let mut state = self.state.lock();
        if state.entries.contains_key(&key) {
            return;
        }
        while state.entries.len() >= self.capacity {
            match state.order.pop_front() {
                Some(oldest) => {
                    state.entries.remove(&oldest);
                }
                None => break,
            }
        }
        state.order.push_back(key.clone());
        state.entries.insert(key, translation);
    }
}

#[async_trait]
impl<T: Translator> Translator for CachedTranslator<T> {
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<(String, UsageMetrics)> {
        let key = (
            source_lang.to_string(),
            target_lang.to_string(),
            text.to_string(),
        );

        if let Some(hit) = self.lookup(&key) {
            debug!("Cache hit for {} chars ({} -> {})", text.len(), source_lang, target_lang);
            return Ok((hit, UsageMetrics::cache_hit()));
        }

        let (translation, usage) = self.inner.translate(text, source_lang, target_lang).await?;
        self.store(key, translation.clone());
        Ok((translation, usage))
    }

    fn name(&self) -> String {
        format!("cached({})", self.inner.name())
    }
}

/// HTTP translator configured from the environment, cached unless
/// `cache_capacity` is 0
pub fn translator_from_env() -> Result<Arc<dyn Translator>> {
    let config = TranslatorConfig::from_env()?;
    let capacity = config.cache_capacity;
    let http = HttpTranslator::new(config)?;

    if capacity == 0 {
        Ok(Arc::new(http))
    } else {
        Ok(Arc::new(CachedTranslator::new(http, capacity)))
    }
}
