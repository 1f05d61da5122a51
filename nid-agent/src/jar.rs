//! File-backed cookie jars.
//!
//! One JSON document holds every jar. Each jar is either the default store or
//! a private one; with `positional_ids` set the listing only reports ids, the
//! way some browsers expose their cookie stores.

use std::path::PathBuf;

use async_trait::async_trait;
use nid_bootstrap::{
    CookieSpec, CookieStoreApi, CredentialStoreRef, NidError, Result, StoreListing,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use url::Url;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JarFile {
    #[serde(default)]
    pub positional_ids: bool,
    #[serde(default)]
    pub stores: Vec<Jar>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jar {
    pub id: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub cookies: Vec<CookieSpec>,
}

impl JarFile {
    /// A default jar plus one private jar.
    pub fn starter() -> Self {
        Self {
            positional_ids: false,
            stores: vec![
                Jar {
                    id: "default".to_string(),
                    private: false,
                    cookies: Vec::new(),
                },
                Jar {
                    id: "private".to_string(),
                    private: true,
                    cookies: Vec::new(),
                },
            ],
        }
    }

    fn jar_mut(&mut self, store_id: &str) -> Result<&mut Jar> {
        self.stores
            .iter_mut()
            .find(|jar| jar.id == store_id)
            .ok_or_else(|| NidError::store_unavailable(format!("no cookie store {store_id}")))
    }
}

/// Whether a cookie with `domain` is sent to `host`.
fn domain_matches(domain: &str, host: &str) -> bool {
    match domain.strip_prefix('.') {
        Some(suffix) => host == suffix || host.ends_with(&format!(".{suffix}")),
        None => host == domain,
    }
}

pub struct JsonCookieJar {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonCookieJar {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Create the file with [`JarFile::starter`] if it does not exist yet.
    pub async fn ensure_exists(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        let exists = tokio::fs::try_exists(&self.path)
            .await
            .map_err(|e| self.unavailable(e))?;
        if exists {
            return Ok(());
        }
        self.write(&JarFile::starter()).await
    }

    pub async fn read(&self) -> Result<JarFile> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| self.unavailable(e))?;
        serde_json::from_str(&raw).map_err(|e| self.unavailable(e))
    }

    async fn write(&self, file: &JarFile) -> Result<()> {
        let body = serde_json::to_vec_pretty(file).map_err(|e| self.unavailable(e))?;
        self.write_bytes(body).await.map_err(|e| self.unavailable(e))
    }

    async fn write_bytes(&self, body: Vec<u8>) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await
    }

    fn unavailable(&self, err: impl std::fmt::Display) -> NidError {
        NidError::store_unavailable(format!("{}: {err}", self.path.display()))
    }
}

#[async_trait]
impl CookieStoreApi for JsonCookieJar {
    async fn list_stores(&self) -> Result<StoreListing> {
        let file = self.read().await?;
        let listing = if file.positional_ids {
            StoreListing::Positional(file.stores.into_iter().map(|jar| jar.id).collect())
        } else {
            StoreListing::Flagged(
                file.stores
                    .into_iter()
                    .map(|jar| CredentialStoreRef::new(jar.id, jar.private))
                    .collect(),
            )
        };
        Ok(listing)
    }

    async fn get_cookie(&self, store_id: &str, url: &str, name: &str) -> Result<Option<String>> {
        let url = Url::parse(url).map_err(|e| NidError::store_unavailable(e.to_string()))?;
        let host = url.host_str().unwrap_or_default();

        let mut file = self.read().await?;
        let jar = file.jar_mut(store_id)?;
        Ok(jar
            .cookies
            .iter()
            .find(|c| c.name == name && domain_matches(&c.domain, host))
            .map(|c| c.value.clone()))
    }

    async fn set_cookie(&self, store_id: &str, cookie: &CookieSpec) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut file = self.read().await?;
        let jar = file.jar_mut(store_id)?;

        jar.cookies.retain(|c| {
            !(c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path)
        });
        jar.cookies.push(cookie.clone());
        self.write(&file).await
    }
}
