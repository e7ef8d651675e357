//! CSRF token slots
//!
//! One slot per [`AuthScope`], created at startup. Readers take the slot's
//! read lock; only a cold or invalidated slot goes through the acquisition
//! mutex, so a burst of workers on a cold start issues a single token request.

use super::{FetchError, FetchRequest, Result, Upstream};
use crate::config::{AuthScope, AuthSpec, Catalog};
use crate::document::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

struct TokenSlot {
    spec: AuthSpec,
    url: String,
    current: RwLock<Option<String>>,
    acquire: Mutex<()>,
    requests: AtomicUsize,
}

impl TokenSlot {
    async fn obtain(&self, upstream: &dyn Upstream) -> Result<String> {
        self.requests.fetch_add(1, Ordering::Relaxed);

        let auth_error = |reason: String| FetchError::Auth {
            url: self.url.clone(),
            reason,
        };

        let body = upstream
            .fetch(&FetchRequest::get(self.url.clone()))
            .await
            .map_err(|e| auth_error(e.to_string()))?;
        let doc = json::decode(&body).map_err(|e| auth_error(e.to_string()))?;

        let path = &self.spec.token_path_in_response;
        let token = doc
            .lookup(path)
            .and_then(|node| node.as_str(path))
            .map_err(|e| auth_error(e.to_string()))?;
        if token.is_empty() {
            return Err(auth_error(format!("empty token at '{path}'")));
        }

        Ok(token.to_string())
    }
}

#[derive(Default)]
pub struct TokenManager {
    slots: HashMap<AuthScope, TokenSlot>,
}

impl TokenManager {
    pub fn new(catalog: &Catalog) -> Self {
        let slots = catalog
            .auth_scopes()
            .into_iter()
            .map(|(scope, spec, url)| {
                let slot = TokenSlot {
                    spec,
                    url,
                    current: RwLock::new(None),
                    acquire: Mutex::new(()),
                    requests: AtomicUsize::new(0),
                };
                (scope, slot)
            })
            .collect();
        Self { slots }
    }

    fn slot(&self, scope: AuthScope) -> Result<&TokenSlot> {
        self.slots.get(&scope).ok_or_else(|| FetchError::Auth {
            url: String::new(),
            reason: format!("no token slot for {scope:?}"),
        })
    }

    /// Current token for the scope, obtaining one when the slot is empty
    pub async fn token_for(&self, scope: AuthScope, upstream: &dyn Upstream) -> Result<String> {
        let slot = self.slot(scope)?;

        if let Some(token) = slot.current.read().await.as_ref() {
            return Ok(token.clone());
        }

        let _guard = slot.acquire.lock().await;
        // Another worker may have filled the slot while we waited
        if let Some(token) = slot.current.read().await.as_ref() {
            return Ok(token.clone());
        }

        let token = slot.obtain(upstream).await?;
        info!(url = %slot.url, "Obtained auth token");
        *slot.current.write().await = Some(token.clone());
        Ok(token)
    }

    /// Clear the slot if it still holds `stale`
    pub async fn invalidate(&self, scope: AuthScope, stale: &str) {
        let Ok(slot) = self.slot(scope) else {
            return;
        };
        let mut current = slot.current.write().await;
        if current.as_deref() == Some(stale) {
            debug!(url = %slot.url, "Invalidated auth token");
            *current = None;
        }
    }

    /// Token endpoint requests issued for the scope so far
    pub fn requests(&self, scope: AuthScope) -> usize {
        self.slots
            .get(&scope)
            .map(|slot| slot.requests.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthKind, ServiceId};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Duration;

    /// Hands out `token-1`, `token-2`, ... after a short delay
    struct CountingIssuer {
        issued: AtomicUsize,
    }

    #[async_trait]
    impl Upstream for CountingIssuer {
        async fn fetch(&self, _request: &FetchRequest) -> Result<Bytes> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Bytes::from(format!(r#"{{"csrf_token":"token-{n}"}}"#)))
        }
    }

    struct StaticBody(&'static str);

    #[async_trait]
    impl Upstream for StaticBody {
        async fn fetch(&self, _request: &FetchRequest) -> Result<Bytes> {
            Ok(Bytes::from_static(self.0.as_bytes()))
        }
    }

    fn scope() -> AuthScope {
        AuthScope {
            service: ServiceId(0),
            resource: None,
        }
    }

    fn manager() -> TokenManager {
        let slot = TokenSlot {
            spec: AuthSpec {
                kind: AuthKind::Csrf,
                token_header_key: "X-CSRF-Token".to_string(),
                token_gen_endpoint: "/csrf".to_string(),
                token_path_in_response: "/csrf_token".to_string(),
            },
            url: "http://node/csrf".to_string(),
            current: RwLock::new(None),
            acquire: Mutex::new(()),
            requests: AtomicUsize::new(0),
        };
        TokenManager {
            slots: HashMap::from([(scope(), slot)]),
        }
    }

    #[tokio::test]
    async fn test_concurrent_cold_start_single_request() {
        let manager = Arc::new(manager());
        let issuer = Arc::new(CountingIssuer {
            issued: AtomicUsize::new(0),
        });

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            let issuer = issuer.clone();
            handles.push(tokio::spawn(async move {
                manager.token_for(scope(), issuer.as_ref()).await.unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), "token-1");
        }
        assert_eq!(manager.requests(scope()), 1);
        assert_eq!(issuer.issued.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_only_clears_stale_token() {
        let manager = manager();
        let issuer = CountingIssuer {
            issued: AtomicUsize::new(0),
        };

        let first = manager.token_for(scope(), &issuer).await.unwrap();
        manager.invalidate(scope(), &first).await;
        let second = manager.token_for(scope(), &issuer).await.unwrap();
        assert_eq!(second, "token-2");

        // A second worker that saw the old token must not discard the new one
        manager.invalidate(scope(), &first).await;
        assert_eq!(manager.token_for(scope(), &issuer).await.unwrap(), "token-2");
        assert_eq!(manager.requests(scope()), 2);
    }

    #[tokio::test]
    async fn test_empty_token_is_auth_error() {
        let manager = manager();
        let err = manager
            .token_for(scope(), &StaticBody(r#"{"csrf_token":""}"#))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Auth { .. }));
    }

    #[tokio::test]
    async fn test_non_string_token_is_auth_error() {
        let manager = manager();
        let err = manager
            .token_for(scope(), &StaticBody(r#"{"csrf_token":42}"#))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Auth { ref reason, .. } if reason.contains("string")));
    }

    #[tokio::test]
    async fn test_unknown_scope() {
        let manager = TokenManager::default();
        let err = manager
            .token_for(scope(), &StaticBody("{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Auth { .. }));
    }
}
