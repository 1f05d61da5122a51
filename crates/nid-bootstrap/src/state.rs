//! Durable bootstrap state.
//!
//! The state is read once at startup and then kept in memory; every mutation
//! is flushed back to the [`PersistentStore`] before the lock is released, so
//! writes reach the store in the order they were made.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{NidError, Result};
use crate::host::{Items, PersistentStore};
use crate::token::Token;

/// Key holding the prefetched token.
pub const NEXT_TOKEN_KEY: &str = "next_nid";
/// Key holding the last observed private-context permission.
pub const PERMISSION_KEY: &str = "allowed_in_incognito";

/// Typed view of the durable record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct State {
    pub next_token: Option<Token>,
    pub permission_granted: bool,
}

impl State {
    /// Build the state from raw items, falling back to defaults for absent
    /// or mistyped keys.
    pub fn from_items(items: &Items) -> Self {
        let next_token = items
            .get(NEXT_TOKEN_KEY)
            .and_then(Value::as_str)
            .map(Token::new);
        let permission_granted = items
            .get(PERMISSION_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Self {
            next_token,
            permission_granted,
        }
    }

    /// Write this state into `items`, leaving unrelated keys untouched.
    pub fn write_into(&self, items: &mut Items) {
        let next = match &self.next_token {
            Some(token) => Value::String(token.as_str().to_string()),
            None => Value::Null,
        };
        items.insert(NEXT_TOKEN_KEY.to_string(), next);
        items.insert(
            PERMISSION_KEY.to_string(),
            Value::Bool(self.permission_granted),
        );
    }
}

struct Loaded {
    state: State,
    items: Items,
}

/// In-memory state shared by every component, flushed after each change.
pub struct SharedState {
    store: Arc<dyn PersistentStore>,
    inner: Mutex<Loaded>,
}

impl SharedState {
    /// Load the durable record once.
    pub async fn load(store: Arc<dyn PersistentStore>) -> Result<Self> {
        let items = store.load().await?;
        let state = State::from_items(&items);
        debug!(
            has_next_token = state.next_token.is_some(),
            permission_granted = state.permission_granted,
            "Loaded bootstrap state"
        );

        Ok(Self {
            store,
            inner: Mutex::new(Loaded { state, items }),
        })
    }

    pub async fn snapshot(&self) -> State {
        self.inner.lock().await.state.clone()
    }

    /// Remove and return the prefetched token, if any.
    ///
    /// A failed flush is logged and ignored: the token has already left the
    /// slot and is handed to the caller either way.
    pub async fn take_next_token(&self) -> Option<Token> {
        let mut inner = self.inner.lock().await;
        let token = inner.state.next_token.take()?;

        if let Err(e) = self.flush(&mut inner).await {
            warn!(error = %e, "Failed to persist cleared token slot (non-fatal)");
        }
        Some(token)
    }

    /// Fill the single slot, replacing whatever it held.
    pub async fn store_next_token(&self, token: Token) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.state.next_token = Some(token);
        self.flush(&mut inner).await
    }

    pub async fn permission_granted(&self) -> bool {
        self.inner.lock().await.state.permission_granted
    }

    pub async fn set_permission_granted(&self, allowed: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.state.permission_granted = allowed;
        self.flush(&mut inner).await
    }

    async fn flush(&self, inner: &mut Loaded) -> Result<()> {
        let Loaded { state, items } = inner;
        state.write_into(items);
        self.store.save(items).await
    }
}

/// Volatile store, useful for tests and hosts without durable storage.
#[derive(Default)]
pub struct MemoryStore {
    items: parking_lot::Mutex<Items>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: Items) -> Self {
        Self {
            items: parking_lot::Mutex::new(items),
        }
    }

    pub fn items(&self) -> Items {
        self.items.lock().clone()
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn load(&self) -> Result<Items> {
        Ok(self.items.lock().clone())
    }

    async fn save(&self, items: &Items) -> Result<()> {
        let mut stored = self.items.lock();
        for (key, value) in items {
            stored.insert(key.clone(), value.clone());
        }
        Ok(())
    }
}

/// JSON object stored in a single file.
///
/// Saves go through a sibling temporary file and a rename so a crash never
/// leaves a truncated record behind.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PersistentStore for JsonFileStore {
    async fn load(&self) -> Result<Items> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Items::new()),
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(Items::new());
        }

        match serde_json::from_str::<Value>(&raw)? {
            Value::Object(items) => Ok(items),
            other => Err(NidError::persistence(format!(
                "expected a JSON object in {}, found {}",
                self.path.display(),
                type_name(&other)
            ))),
        }
    }

    async fn save(&self, items: &Items) -> Result<()> {
        let mut merged = self.load().await?;
        for (key, value) in items {
            merged.insert(key.clone(), value.clone());
        }
        let body = serde_json::to_vec_pretty(&merged)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
