//! Cloud secret references (`#gcp:`, `#aws:`, `#azure:`).
//!
//! A reference has the form `#<provider>:<ref>` with an optional `#<field>`
//! suffix. When the field is present the fetched payload is parsed as a JSON
//! object and only that field is returned.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretProvider {
    Gcp,
    Aws,
    Azure,
}

impl SecretProvider {
    pub fn prefix(&self) -> &'static str {
        match self {
            SecretProvider::Gcp => "gcp",
            SecretProvider::Aws => "aws",
            SecretProvider::Azure => "azure",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "gcp" => Some(SecretProvider::Gcp),
            "aws" => Some(SecretProvider::Aws),
            "azure" => Some(SecretProvider::Azure),
            _ => None,
        }
    }
}

impl fmt::Display for SecretProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretReference {
    pub provider: SecretProvider,
    pub reference: String,
    /// Empty when the whole payload is wanted
    pub fragment: String,
}

impl SecretReference {
    /// Parse `#gcp:projects/p/secrets/s/versions/latest#password`.
    pub fn parse(raw: &str) -> Option<Self> {
        let body = raw.trim().strip_prefix('#')?;
        let (prefix, rest) = body.split_once(':')?;
        let provider = SecretProvider::from_prefix(prefix)?;
        let (reference, fragment) = match rest.rsplit_once('#') {
            Some((reference, fragment)) => (reference, fragment),
            None => (rest, ""),
        };
        if reference.is_empty() {
            return None;
        }
        Some(Self {
            provider,
            reference: reference.to_string(),
            fragment: fragment.to_string(),
        })
    }
}

/// Resolves a secret reference to its plaintext value.
#[async_trait]
pub trait SecretResolver: Send + Sync {
    async fn resolve(
        &self,
        provider: SecretProvider,
        reference: &str,
        fragment: &str,
    ) -> anyhow::Result<String>;
}

/// Fetches the raw secret payload from a secret manager.
#[async_trait]
pub trait SecretFetcher: Send + Sync {
    async fn fetch(&self, provider: SecretProvider, reference: &str) -> anyhow::Result<String>;
}

/// Pick one field out of a JSON secret payload. An empty fragment returns
/// the payload untouched.
pub fn select_fragment(payload: &str, fragment: &str) -> anyhow::Result<String> {
    if fragment.is_empty() {
        return Ok(payload.to_string());
    }
    let parsed: serde_json::Value =
        serde_json::from_str(payload).context("secret payload is not valid JSON")?;
    let field = parsed
        .get(fragment)
        .ok_or_else(|| anyhow!("field '{}' not present in secret payload", fragment))?;
    Ok(match field {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

type CacheKey = (SecretProvider, String, String);

/// TTL cache in front of a [`SecretFetcher`].
pub struct CachingSecretResolver {
    fetcher: Arc<dyn SecretFetcher>,
    ttl: Duration,
    cache: DashMap<CacheKey, (String, Instant)>,
}

impl CachingSecretResolver {
    pub fn new(fetcher: Arc<dyn SecretFetcher>, ttl: Duration) -> Self {
        Self {
            fetcher,
            ttl,
            cache: DashMap::new(),
        }
    }

    pub fn invalidate(&self) {
        self.cache.clear();
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}

#[async_trait]
impl SecretResolver for CachingSecretResolver {
    async fn resolve(
        &self,
        provider: SecretProvider,
        reference: &str,
        fragment: &str,
    ) -> anyhow::Result<String> {
        let key = (provider, reference.to_string(), fragment.to_string());
        if let Some(entry) = self.cache.get(&key) {
            let (value, stored_at) = entry.value();
            if stored_at.elapsed() < self.ttl {
                debug!(%provider, reference, "secret served from cache");
                return Ok(value.clone());
            }
        }

        let payload = self
            .fetcher
            .fetch(provider, reference)
            .await
            .with_context(|| format!("fetching {} secret '{}'", provider, reference))?;
        let value = select_fragment(&payload, fragment)?;
        self.cache.insert(key, (value.clone(), Instant::now()));
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SecretFetcher for CountingFetcher {
        async fn fetch(&self, _provider: SecretProvider, reference: &str) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match reference {
                "db" => Ok(r#"{"user": "admin", "port": 5432}"#.to_string()),
                "plain" => Ok("s3cr3t".to_string()),
                _ => Err(anyhow!("secret not found")),
            }
        }
    }

    #[test]
    fn test_parse_reference() {
        let parsed = SecretReference::parse("#gcp:projects/p/secrets/db#user").unwrap();
        assert_eq!(parsed.provider, SecretProvider::Gcp);
        assert_eq!(parsed.reference, "projects/p/secrets/db");
        assert_eq!(parsed.fragment, "user");

        let parsed = SecretReference::parse("#aws:prod/api-key").unwrap();
        assert_eq!(parsed.fragment, "");
        assert!(SecretReference::parse("#vault:x").is_none());
        assert!(SecretReference::parse("#azure:").is_none());
    }

    #[test]
    fn test_select_fragment() {
        let payload = r#"{"user": "admin", "port": 5432}"#;
        assert_eq!(select_fragment(payload, "").unwrap(), payload);
        assert_eq!(select_fragment(payload, "user").unwrap(), "admin");
        assert_eq!(select_fragment(payload, "port").unwrap(), "5432");
        assert!(select_fragment(payload, "missing").is_err());
        assert!(select_fragment("not json", "user").is_err());
    }

    #[tokio::test]
    async fn test_cache_hits_within_ttl() {
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
        });
        let resolver = CachingSecretResolver::new(fetcher.clone(), Duration::from_secs(60));

        assert_eq!(
            resolver.resolve(SecretProvider::Gcp, "db", "user").await.unwrap(),
            "admin"
        );
        assert_eq!(
            resolver.resolve(SecretProvider::Gcp, "db", "user").await.unwrap(),
            "admin"
        );
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        // a different fragment is a different cache entry
        resolver.resolve(SecretProvider::Gcp, "db", "port").await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(resolver.cached_entries(), 2);
    }

    #[tokio::test]
    async fn test_expired_entries_refetch() {
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
        });
        let resolver = CachingSecretResolver::new(fetcher.clone(), Duration::ZERO);
        resolver.resolve(SecretProvider::Aws, "plain", "").await.unwrap();
        resolver.resolve(SecretProvider::Aws, "plain", "").await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);

        assert!(resolver.resolve(SecretProvider::Aws, "nope", "").await.is_err());
    }
}
