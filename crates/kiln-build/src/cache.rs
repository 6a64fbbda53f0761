//! Artifacts derived from build output, cached by output fingerprint.
//!
//! Anything derived from an [`Output`] (a rendered page shell, a loaded
//! server bundle) is kept here until the target produces new output. Each target holds at most one entry;
//! a lookup with a different fingerprint replaces it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::correlate::Output;

pub struct ArtifactCache<V> {
    entries: Mutex<HashMap<String, (String, Arc<V>)>>,
}

impl<V> Default for ArtifactCache<V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<V> ArtifactCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached value for `target` if it was derived from exactly this output.
    pub fn get(&self, target: &str, output: &Output) -> Option<Arc<V>> {
        self.lookup(target, &output.fingerprint())
    }

    fn lookup(&self, target: &str, fingerprint: &str) -> Option<Arc<V>> {
        self.entries
            .lock()
            .get(target)
            .filter(|(cached, _)| cached == fingerprint)
            .map(|(_, value)| Arc::clone(value))
    }

    /// Cached value, or the result of `load` stored for next time. A failed
    /// load leaves the cache untouched.
    pub async fn get_or_load<F, Fut, E>(&self, target: &str, output: &Output, load: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let fingerprint = output.fingerprint();
        if let Some(value) = self.lookup(target, &fingerprint) {
            return Ok(value);
        }

        let value = Arc::new(load().await?);
        self.entries
            .lock()
            .insert(target.to_string(), (fingerprint, Arc::clone(&value)));
        Ok(value)
    }

    pub fn invalidate(&self, target: &str) -> bool {
        self.entries.lock().remove(target).is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
