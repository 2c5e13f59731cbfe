//! The session-parameter snapshot.
//!
//! This is the only long-lived, shared mutable state the core touches. The
//! server reports session parameters (datetime output/input formats and the
//! like) on login and on `ALTER SESSION`; the driver facade stores them here
//! and every decode path reads them through a single mutex-guarded lookup.
//!
//! A value of `None` means the parameter is explicitly unset, which is
//! distinct from the key being absent.

use std::collections::HashMap;
use std::sync::Mutex;

/// Session parameters keyed by lowercase name. Cheap to share behind an
/// `Arc`; each lookup acquires the lock for the duration of one read.
#[derive(Debug, Default)]
pub struct SessionParams {
    inner: Mutex<HashMap<String, Option<String>>>,
}

impl SessionParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a snapshot from an iterator of `(key, value)` pairs. Keys are
    /// normalized to lowercase; unrecognized keys are kept and ignored by
    /// the consumers.
    pub fn from_iter<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Option<String>>,
    {
        let map = pairs
            .into_iter()
            .map(|(k, v)| (k.into().to_lowercase(), v.into()))
            .collect();
        Self {
            inner: Mutex::new(map),
        }
    }

    /// Replaces one parameter. Called by the facade when the server reports
    /// a parameter change; callers must not race this against an in-flight
    /// lookup they care about.
    pub fn set(&self, key: &str, value: Option<String>) {
        let mut map = self.inner.lock().expect("session params mutex poisoned");
        map.insert(key.to_lowercase(), value);
    }

    /// Looks up one parameter. Returns `None` when the key is absent and
    /// `Some(None)` when it is present but unset.
    pub fn get(&self, key: &str) -> Option<Option<String>> {
        let map = self.inner.lock().expect("session params mutex poisoned");
        map.get(&key.to_lowercase()).cloned()
    }

    /// Convenience for consumers that treat "absent" and "unset" alike.
    pub fn get_value(&self, key: &str) -> Option<String> {
        self.get(key).flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let params = SessionParams::from_iter(vec![(
            "TIMESTAMP_OUTPUT_FORMAT",
            Some("YYYY-MM-DD HH24:MI:SS.FF3".to_string()),
        )]);
        assert_eq!(
            params.get_value("timestamp_output_format").as_deref(),
            Some("YYYY-MM-DD HH24:MI:SS.FF3")
        );
    }

    #[test]
    fn test_absent_vs_unset() {
        let params = SessionParams::new();
        params.set("date_output_format", None);
        assert_eq!(params.get("date_output_format"), Some(None));
        assert_eq!(params.get("time_output_format"), None);
    }
}
