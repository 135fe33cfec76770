//! Run configuration.
//!
//! Every option can be given on the command line or through an `EDGECHECK_*`
//! environment variable.

use std::fmt;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::domain::backend::{MIRROR_NAMES, ORIGIN_NAME};
use crate::error::HarnessError;

/// Default port of the origin backend.
pub const DEFAULT_ORIGIN_PORT: u16 = 8080;
/// Default port of the first mirror.
pub const DEFAULT_BACKUP_PORT1: u16 = 8081;
/// Default port of the second mirror.
pub const DEFAULT_BACKUP_PORT2: u16 = 8082;

/// CDN vendor, used to gate vendor-specific assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Vendor {
    /// Fastly.
    Fastly,
    /// Cloudflare.
    Cloudflare,
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vendor::Fastly => f.write_str("fastly"),
            Vendor::Cloudflare => f.write_str("cloudflare"),
        }
    }
}

/// Options for one acceptance run against an edge.
#[derive(Parser, Debug, Clone)]
#[command(name = "edgecheck", about = "Acceptance tests for a CDN edge", version)]
pub struct HarnessConfig {
    /// Hostname of the edge under test
    #[arg(long, env = "EDGECHECK_EDGE_HOST")]
    pub edge_host: Option<String>,

    /// Port the origin backend listens on
    #[arg(long, env = "EDGECHECK_ORIGIN_PORT", default_value_t = DEFAULT_ORIGIN_PORT)]
    pub origin_port: u16,

    /// Port the first mirror listens on
    #[arg(long, env = "EDGECHECK_BACKUP_PORT1", default_value_t = DEFAULT_BACKUP_PORT1)]
    pub backup_port1: u16,

    /// Port the second mirror listens on
    #[arg(long, env = "EDGECHECK_BACKUP_PORT2", default_value_t = DEFAULT_BACKUP_PORT2)]
    pub backup_port2: u16,

    /// PEM certificate overriding the generated self-signed backend certificate
    #[arg(long, env = "EDGECHECK_BACKEND_CERT")]
    pub backend_cert: Option<PathBuf>,

    /// PEM private key, must be given together with --backend-cert
    #[arg(long, env = "EDGECHECK_BACKEND_KEY")]
    pub backend_key: Option<PathBuf>,

    /// Serve backends over plain HTTP
    #[arg(long, env = "EDGECHECK_DISABLE_BACKEND_TLS")]
    pub disable_backend_tls: bool,

    /// Skip verification of the edge's TLS certificate
    #[arg(long, env = "EDGECHECK_SKIP_VERIFY_TLS")]
    pub skip_verify_tls: bool,

    /// Only run the origin backend and skip failover scenarios
    #[arg(long, env = "EDGECHECK_SKIP_FAILOVER")]
    pub skip_failover: bool,

    /// Vendor of the edge; enables vendor-specific scenarios
    #[arg(long, value_enum, env = "EDGECHECK_VENDOR")]
    pub vendor: Option<Vendor>,

    /// Log every response for debugging
    #[arg(long, env = "EDGECHECK_DEBUG_RESP")]
    pub debug_resp: bool,

    /// Only run scenarios whose name contains this string
    #[arg(long, env = "EDGECHECK_FILTER")]
    pub filter: Option<String>,
}

impl HarnessConfig {
    /// Check combinations clap cannot express.
    pub fn validate(&self) -> Result<(), HarnessError> {
        match self.edge_host.as_deref() {
            None | Some("") => {
                return Err(HarnessError::Config(
                    "--edge-host must be set to the CDN edge hostname to test against".into(),
                ))
            }
            Some(_) => {}
        }

        if self.backend_cert.is_some() != self.backend_key.is_some() {
            return Err(HarnessError::Config(
                "--backend-cert and --backend-key must be given together".into(),
            ));
        }

        if self.disable_backend_tls && self.backend_cert.is_some() {
            return Err(HarnessError::Config(
                "--backend-cert has no effect with --disable-backend-tls".into(),
            ));
        }

        Ok(())
    }

    /// The validated edge hostname.
    pub fn edge_host(&self) -> Result<&str, HarnessError> {
        self.edge_host
            .as_deref()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| HarnessError::Config("--edge-host is required".into()))
    }

    /// Name and port of every backend, in priority order.
    pub fn fleet_layout(&self) -> Vec<(&'static str, u16)> {
        let mut layout = vec![(ORIGIN_NAME, self.origin_port)];
        if !self.skip_failover {
            layout.push((MIRROR_NAMES[0], self.backup_port1));
            layout.push((MIRROR_NAMES[1], self.backup_port2));
        }
        layout
    }
}
