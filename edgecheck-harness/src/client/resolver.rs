//! DNS resolution pinned to a single edge address.
//!
//! A CDN hostname usually resolves to many points of presence. If requests in
//! one run landed on different nodes, cache and health state observed by one
//! request would say nothing about the next. The edge hostname is therefore
//! resolved once and every later connection goes to that first address.

use std::error::Error as StdError;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use edgecheck_core::HarnessError;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use tokio::sync::OnceCell;
use tracing::info;

struct Inner {
    host: String,
    pinned: OnceCell<IpAddr>,
}

/// Resolver that pins the edge hostname and passes other names through.
#[derive(Clone)]
pub struct PinnedResolver {
    inner: Arc<Inner>,
}

impl PinnedResolver {
    /// Pin `host` on first lookup.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                host: host.into(),
                pinned: OnceCell::new(),
            }),
        }
    }

    /// Hostname being pinned.
    pub fn host(&self) -> &str {
        &self.inner.host
    }

    /// Address the host is pinned to, once it has been looked up.
    pub fn pinned(&self) -> Option<IpAddr> {
        self.inner.pinned.get().copied()
    }

    /// Resolve `host`. The pinned host always yields the same single address;
    /// any other host is looked up normally.
    pub async fn resolve_host(&self, host: &str) -> Result<Vec<SocketAddr>, HarnessError> {
        if !host.eq_ignore_ascii_case(&self.inner.host) {
            return lookup(host).await;
        }

        let ip = self
            .inner
            .pinned
            .get_or_try_init(|| async {
                let first = lookup(host)
                    .await?
                    .into_iter()
                    .next()
                    .map(|addr| addr.ip())
                    .ok_or_else(|| HarnessError::Resolve {
                        host: host.to_string(),
                        reason: "no addresses returned".into(),
                    })?;
                info!(%host, ip = %first, "pinned edge address");
                Ok::<_, HarnessError>(first)
            })
            .await?;

        Ok(vec![SocketAddr::new(*ip, 0)])
    }

    async fn resolve_name(self, name: Name) -> Result<Addrs, Box<dyn StdError + Send + Sync>> {
        let addrs = self.resolve_host(name.as_str()).await?;
        Ok(Box::new(addrs.into_iter()))
    }
}

impl std::fmt::Debug for PinnedResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinnedResolver")
            .field("host", &self.inner.host)
            .field("pinned", &self.pinned())
            .finish()
    }
}

impl Resolve for PinnedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(self.clone().resolve_name(name))
    }
}

async fn lookup(host: &str) -> Result<Vec<SocketAddr>, HarnessError> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| HarnessError::Resolve {
            host: host.to_string(),
            reason: e.to_string(),
        })?
        .collect();

    if addrs.is_empty() {
        return Err(HarnessError::Resolve {
            host: host.to_string(),
            reason: "no addresses returned".into(),
        });
    }
    Ok(addrs)
}
