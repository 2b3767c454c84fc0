//! Configuration loading from `.env` files.

use std::{env, path::PathBuf};

use anyhow::{bail, Context, Result};

/// Default request body ceiling: 10 MiB, sized for base64 image payloads.
pub const DEFAULT_BODY_LIMIT: usize = 10 * 1024 * 1024;

/// Default access code gating admin self-registration.
pub const DEFAULT_ADMIN_CODE: &str = "admin123";

/// Default access code gating authority self-registration.
pub const DEFAULT_AUTHORITY_CODE: &str = "Aut123";

/// Runtime settings derived from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Path of the JSON document holding all persisted state.
    pub data_file: PathBuf,
    /// Bind address, e.g. `127.0.0.1:3000`.
    pub bind: String,
    /// Allowed CORS origin; `None` allows any origin.
    pub cors_origin: Option<String>,
    /// Maximum accepted request body size in bytes.
    pub body_limit: usize,
    /// Certificate and key paths when serving HTTPS.
    pub tls: Option<TlsSettings>,
    /// Access code required to register an admin account.
    pub admin_code: String,
    /// Access code required to register an authority account.
    pub authority_code: String,
}

/// PEM file locations for TLS serving.
#[derive(Debug, Clone)]
pub struct TlsSettings {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl Settings {
    /// Load settings from the specified `.env` file.
    pub fn from_env(path: &str) -> Result<Self> {
        dotenvy::from_filename(path).context("reading env file")?;
        let data_file = PathBuf::from(env::var("DATA_FILE")?);
        let bind = env::var("BIND_ADDR")?;
        let cors_origin = env::var("CORS_ORIGIN")
            .ok()
            .filter(|s| !s.is_empty() && s != "*");
        let body_limit = env::var("BODY_LIMIT_BYTES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_BODY_LIMIT);
        let tls_cert = env::var("TLS_CERT").ok().filter(|s| !s.is_empty());
        let tls_key = env::var("TLS_KEY").ok().filter(|s| !s.is_empty());
        let tls = match (tls_cert, tls_key) {
            (Some(cert), Some(key)) => Some(TlsSettings {
                cert: cert.into(),
                key: key.into(),
            }),
            (None, None) => None,
            _ => bail!("TLS_CERT and TLS_KEY must be set together"),
        };
        let admin_code = env::var("ADMIN_CODE").unwrap_or_else(|_| DEFAULT_ADMIN_CODE.into());
        let authority_code =
            env::var("AUTHORITY_CODE").unwrap_or_else(|_| DEFAULT_AUTHORITY_CODE.into());
        Ok(Self {
            data_file,
            bind,
            cors_origin,
            body_limit,
            tls,
            admin_code,
            authority_code,
        })
    }
}
