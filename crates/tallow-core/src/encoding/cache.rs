//! Signature cache keyed by encoding string

use super::{parse, parse_strict, Signature};
use crate::error::ParseError;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Hit/miss counters of a [`SignatureCache`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Lookups answered from the cache
    pub hits: usize,
    /// Lookups that had to parse
    pub misses: usize,
}

/// Concurrent cache of parsed method signatures
///
/// Each distinct encoding is parsed once; later lookups share the same
/// `Arc<Signature>`. Only strictly valid encodings are cached, so a
/// malformed encoding reports its error on every lookup.
#[derive(Debug, Default)]
pub struct SignatureCache {
    methods: DashMap<String, Arc<Signature>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl SignatureCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Method signature for `encoding`, implicit receiver and selector
    /// removed
    pub fn method(&self, encoding: &str) -> Result<Arc<Signature>, ParseError> {
        if let Some(sig) = self.methods.get(encoding) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(sig.value()));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let sig = Arc::new(parse_strict(encoding)?.into_method());
        let entry = self
            .methods
            .entry(encoding.to_string())
            .or_insert_with(|| Arc::clone(&sig));
        Ok(Arc::clone(entry.value()))
    }

    /// Method signature for `encoding`, tolerating unknown types
    ///
    /// Used where only a prefix of the signature matters (argument counts,
    /// diagnostics). Not cached.
    pub fn method_lenient(&self, encoding: &str) -> Signature {
        match self.methods.get(encoding) {
            Some(sig) => Signature::clone(sig.value()),
            None => parse(encoding).into_method(),
        }
    }

    /// Number of cached signatures
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Current hit/miss counters
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Drop every cached signature
    pub fn clear(&self) {
        self.methods.clear();
    }
}
