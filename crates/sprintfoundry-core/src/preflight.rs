//! Registry preflight (§4.6.3): before planning, if the workspace looks
//! like a JS project, confirm the configured npm registry is reachable.
//!
//! The teacher's dependency stack carries no HTTP client in `gator-core`
//! (`reqwest` lives only in the out-of-scope Tauri app), so this stays a
//! bare reachability probe -- a `tokio::net::TcpStream` connect with a 5s
//! timeout against the resolved registry host -- rather than a full HTTP
//! client, which is all the spec's "ping ... with a 5s timeout" requires.

use std::path::Path;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::error::PreflightViolation;

const SKIP_ENV: &str = "SPRINTFOUNDRY_SKIP_REGISTRY_PREFLIGHT";
const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org/";
const TIMEOUT: Duration = Duration::from_secs(5);

/// Skips entirely when the workspace has no `package.json` (§9 Open
/// Questions, resolved).
pub async fn registry_preflight(workspace_path: &Path) -> Result<(), PreflightViolation> {
    if !workspace_path.join("package.json").exists() {
        return Ok(());
    }
    if std::env::var(SKIP_ENV).map(|v| v == "true").unwrap_or(false) {
        return Ok(());
    }

    let registry = resolve_registry_url(workspace_path).await;
    let (host, port) = parse_host_port(&registry);

    tokio::time::timeout(TIMEOUT, TcpStream::connect((host.as_str(), port)))
        .await
        .map_err(|_| PreflightViolation::RegistryUnreachable {
            registry: registry.clone(),
            source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
        })?
        .map_err(|source| PreflightViolation::RegistryUnreachable {
            registry: registry.clone(),
            source,
        })?;

    Ok(())
}

async fn resolve_registry_url(workspace_path: &Path) -> String {
    if let Ok(v) = std::env::var("NPM_CONFIG_REGISTRY") {
        if !v.trim().is_empty() {
            return v;
        }
    }
    if let Ok(v) = std::env::var("npm_config_registry") {
        if !v.trim().is_empty() {
            return v;
        }
    }
    if let Ok(output) = tokio::process::Command::new("npm")
        .args(["config", "get", "registry"])
        .current_dir(workspace_path)
        .output()
        .await
    {
        if output.status.success() {
            let v = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !v.is_empty() && v != "undefined" {
                return v;
            }
        }
    }
    DEFAULT_REGISTRY.to_string()
}

/// Minimal URL host/port extraction -- the preflight only needs to open a
/// TCP connection, not parse or follow the full URL.
fn parse_host_port(url: &str) -> (String, u16) {
    let without_scheme = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    let default_port = if url.starts_with("http://") { 80 } else { 443 };
    let host_part = without_scheme.split('/').next().unwrap_or(without_scheme);
    match host_part.split_once(':') {
        Some((host, port)) => (host.to_string(), port.parse().unwrap_or(default_port)),
        None => (host_part.to_string(), default_port),
    }
}
