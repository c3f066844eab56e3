//! Round-robin pool of upstream API keys.

use std::sync::atomic::{AtomicUsize, Ordering};

use secrecy::SecretString;

use crate::error::LlmError;

/// The key picked for one upstream call.
#[derive(Debug, Clone)]
pub(crate) struct SelectedKey {
    /// Stable identifier reported in the `X-Selected-Key-ID` response
    /// header. Never the key itself.
    pub id: String,
    pub secret: SecretString,
}

/// Rotates through the configured Gemini API keys, one pick per upstream
/// call.
#[derive(Debug)]
pub(crate) struct KeyPool {
    keys: Vec<SecretString>,
    cursor: AtomicUsize,
}

impl KeyPool {
    pub fn new(keys: Vec<SecretString>) -> Self {
        Self {
            keys,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn select(&self) -> Result<SelectedKey, LlmError> {
        if self.keys.is_empty() {
            return Err(LlmError::InternalError(Some(
                "no Gemini API keys configured".to_string(),
            )));
        }

        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.keys.len();

        Ok(SelectedKey {
            id: format!("key-{}", index + 1),
            secret: self.keys[index].clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(count: usize) -> KeyPool {
        KeyPool::new((0..count).map(|i| SecretString::from(format!("secret-{i}"))).collect())
    }

    #[test]
    fn rotates_round_robin() {
        let pool = pool(3);

        let picks: Vec<String> = (0..7).map(|_| pool.select().unwrap().id).collect();

        assert_eq!(
            picks,
            vec!["key-1", "key-2", "key-3", "key-1", "key-2", "key-3", "key-1"]
        );
    }

    #[test]
    fn empty_pool_is_an_error() {
        let pool = KeyPool::new(Vec::new());
        assert!(pool.select().is_err());
    }
}
