use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::error::StorageError;
use crate::storage::SessionDatabase;

/// Durable home of the session token.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<String>, StorageError>;
    fn save(&self, token: &str) -> Result<(), StorageError>;
    fn remove(&self) -> Result<(), StorageError>;
}

impl TokenStore for SessionDatabase {
    fn load(&self) -> Result<Option<String>, StorageError> {
        self.token()
    }

    fn save(&self, token: &str) -> Result<(), StorageError> {
        self.save_token(token)
    }

    fn remove(&self) -> Result<(), StorageError> {
        self.clear_token()
    }
}

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<String>>,
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<String>, StorageError> {
        Ok(self.token.lock().map_err(|_| StorageError::Poisoned)?.clone())
    }

    fn save(&self, token: &str) -> Result<(), StorageError> {
        *self.token.lock().map_err(|_| StorageError::Poisoned)? = Some(token.to_string());
        Ok(())
    }

    fn remove(&self) -> Result<(), StorageError> {
        *self.token.lock().map_err(|_| StorageError::Poisoned)? = None;
        Ok(())
    }
}

struct Inner {
    token: watch::Sender<Option<String>>,
    store: Box<dyn TokenStore>,
}

/// Process-wide session credential. Only this type mutates it; everyone
/// else reads it or subscribes to changes.
#[derive(Clone)]
pub struct SessionTokenHolder {
    inner: Arc<Inner>,
}

impl SessionTokenHolder {
    /// Starts from whatever token the store persisted last.
    pub fn restore(store: impl TokenStore + 'static) -> Self {
        let token = match store.load() {
            Ok(token) => token.filter(|token| !token.trim().is_empty()),
            Err(err) => {
                log::warn!("Failed to restore session token: {err}");
                None
            }
        };
        if token.is_some() {
            log::info!("Restored session token from storage");
        }

        let (tx, _) = watch::channel(token);
        Self {
            inner: Arc::new(Inner {
                token: tx,
                store: Box::new(store),
            }),
        }
    }

    pub fn in_memory() -> Self {
        Self::restore(MemoryTokenStore::default())
    }

    pub fn token(&self) -> Option<String> {
        self.inner.token.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.token.borrow().is_some()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.inner.token.subscribe()
    }

    /// Publishes the token, then persists it. A blank token logs out.
    pub fn set(&self, token: impl Into<String>) -> Result<(), StorageError> {
        let token = token.into();
        if token.trim().is_empty() {
            self.clear();
            return Ok(());
        }

        if self.publish(Some(token.clone())) {
            log::info!("Session token updated");
        }
        self.inner.store.save(&token)
    }

    /// Logout or unauthorized response.
    pub fn clear(&self) {
        if self.publish(None) {
            log::info!("Session token cleared");
        }
        if let Err(err) = self.inner.store.remove() {
            log::warn!("Failed to remove persisted session token: {err}");
        }
    }

    fn publish(&self, next: Option<String>) -> bool {
        self.inner.token.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        })
    }
}
