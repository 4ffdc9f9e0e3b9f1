//! TLS material for `usessl` instances.

use std::path::Path;

use anyhow::{Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use log::{info, warn};

/// Load the PEM pair, generating a self-signed one first if either file is missing.
pub async fn load_or_generate(cert: &Path, key: &Path, bind_address: &str) -> Result<RustlsConfig> {
    if !cert.exists() || !key.exists() {
        warn!(
            "TLS certificate {} or key {} missing, generating a self-signed pair",
            cert.display(),
            key.display()
        );
        write_self_signed(cert, key, bind_address)?;
    }

    RustlsConfig::from_pem_file(cert, key).await.with_context(|| {
        format!(
            "loading TLS certificate {} and key {}",
            cert.display(),
            key.display()
        )
    })
}

/// Write a fresh self-signed certificate and its key as PEM.
pub fn write_self_signed(cert: &Path, key: &Path, bind_address: &str) -> Result<()> {
    let names = subject_alt_names(bind_address);
    let generated = rcgen::generate_simple_self_signed(names.clone())
        .context("generating self-signed certificate")?;

    std::fs::write(cert, generated.cert.pem())
        .with_context(|| format!("writing TLS certificate {}", cert.display()))?;
    std::fs::write(key, generated.key_pair.serialize_pem())
        .with_context(|| format!("writing TLS key {}", key.display()))?;

    info!(
        "Wrote self-signed certificate {} for {}",
        cert.display(),
        names.join(", ")
    );
    Ok(())
}

/// `localhost` plus the host part of the bind address, if it has one.
fn subject_alt_names(bind_address: &str) -> Vec<String> {
    let mut names = vec!["localhost".to_string()];
    let host = match bind_address.rsplit_once(':') {
        Some((host, _port)) => host,
        None => bind_address,
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if !host.is_empty() && host != "localhost" {
        names.push(host.to_string());
    }
    names
}
