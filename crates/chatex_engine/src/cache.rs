use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// URL → data URL cache shared by the image resolver and snapshot hydration.
///
/// Create one per page and clear it on navigation.
#[derive(Debug, Default)]
pub struct ImageCache {
    entries: Mutex<HashMap<String, String>>,
}

impl ImageCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    /// Stores under the raw key and, when different, the normalized key.
    pub fn insert(&self, raw: &str, normalized: &str, data_url: &str) {
        let mut entries = self.lock();
        if !raw.is_empty() {
            entries.insert(raw.to_string(), data_url.to_string());
        }
        if !normalized.is_empty() && normalized != raw {
            entries.insert(normalized.to_string(), data_url.to_string());
        }
    }

    pub fn entries(&self) -> Vec<(String, String)> {
        self.lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
