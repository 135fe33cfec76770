//! Collision-free identifiers and URLs.
//!
//! Every request built here addresses an object the edge cannot have cached
//! yet, because the URL carries a fresh random identifier.

use url::Url;
use uuid::Uuid;

use crate::error::HarnessError;

/// Query parameter carrying the random identifier.
pub const NOCACHE_PARAM: &str = "nocache";

/// Return a random (version 4) UUID in its hyphenated lowercase form.
pub fn new_uuid() -> String {
    Uuid::new_v4().hyphenated().to_string()
}

/// Builds unique URLs against a single edge.
#[derive(Debug, Clone)]
pub struct UniqueRequestFactory {
    base: Url,
}

impl UniqueRequestFactory {
    /// Factory for `https://<edge_host>`.
    pub fn for_edge_host(edge_host: &str) -> Result<Self, HarnessError> {
        let base = Url::parse(&format!("https://{edge_host}/"))
            .map_err(|e| HarnessError::Config(format!("edge host {edge_host:?}: {e}")))?;
        Self::new(base)
    }

    /// Factory for an arbitrary base URL. Only the scheme and authority are kept.
    pub fn new(mut base: Url) -> Result<Self, HarnessError> {
        if base.host_str().is_none() {
            return Err(HarnessError::Config(format!("{base} has no host")));
        }
        base.set_path("/");
        base.set_query(None);
        base.set_fragment(None);
        Ok(Self { base })
    }

    /// Hostname of the edge, as it appears in the `Host` header.
    pub fn edge_host(&self) -> &str {
        self.base.host_str().unwrap_or_default()
    }

    /// The `Host` header value, including a non-default port.
    pub fn host_header(&self) -> String {
        match self.base.port() {
            Some(port) => format!("{}:{port}", self.edge_host()),
            None => self.edge_host().to_string(),
        }
    }

    /// Scheme and authority every URL is built on.
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// `<base>/?nocache=<uuid>`.
    ///
    /// The identifier lives in the query string of `/` so that requests still
    /// make sense against an edge that is not pointed at the test backends.
    pub fn unique_url(&self) -> Url {
        let mut url = self.base.clone();
        url.query_pairs_mut().append_pair(NOCACHE_PARAM, &new_uuid());
        url
    }

    /// `<base>/<uuid>`, for scenarios that need the identifier in the path.
    pub fn unique_path_url(&self) -> Url {
        self.url_for_path(&format!("/{}", new_uuid()))
    }

    /// `<base><path>` with no identifier.
    pub fn url_for_path(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        url.set_path(path);
        url
    }

    /// Same as [`Self::url_for_path`] but with the scheme swapped, e.g. to
    /// address the plain HTTP listener of an HTTPS edge.
    pub fn url_with_scheme(&self, scheme: &str, path: &str) -> Result<Url, HarnessError> {
        let mut url = self.url_for_path(path);
        url.set_scheme(scheme)
            .map_err(|_| HarnessError::InvalidRequest(format!("cannot use scheme {scheme:?}")))?;
        Ok(url)
    }
}
