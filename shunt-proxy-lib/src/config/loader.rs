use std::collections::HashSet;
use std::fs;
use std::io::Read;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use http::header::HeaderName;

use crate::config::Config;
use crate::error::{ProxyError, Result};

/// Load, resolve and validate a TOML configuration file
///
/// Relative list file paths are resolved against the directory holding
/// the configuration file.
pub fn load_from_path<P: AsRef<Path>>(p: P) -> Result<Config> {
    let path = p.as_ref();
    let txt = fs::read_to_string(path)
        .map_err(|e| ProxyError::Config(format!("Failed to read config file: {e}")))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    load_from_str(&txt, base)
}

/// Parse configuration text; list files are resolved against `base`
pub fn load_from_str(txt: &str, base: &Path) -> Result<Config> {
    let mut cfg: Config = toml::from_str(txt)
        .map_err(|e| ProxyError::Config(format!("Failed to parse config: {e}")))?;

    if let Some(file) = cfg.bypass.appids_file.clone() {
        merge_list(&mut cfg.bypass.appids, &resolve(base, &file))?;
    }
    if let Some(file) = cfg.bypass.source_ips_file.clone() {
        merge_list(&mut cfg.bypass.source_ips, &resolve(base, &file))?;
    }
    if let Some(file) = cfg.traffic.monitored_appids_file.clone() {
        merge_list(&mut cfg.traffic.monitored_appids, &resolve(base, &file))?;
    }

    validate_config(&cfg)?;

    Ok(cfg)
}

/// Read an allow-list: one entry per line, `#` comments and blank lines skipped
pub fn read_list<R: Read>(mut r: R) -> Result<HashSet<String>> {
    let mut data = String::new();
    r.read_to_string(&mut data)
        .map_err(|e| ProxyError::Config(format!("Failed to read list: {e}")))?;
    Ok(data
        .lines()
        .map(str::trim)
        .filter(|item| !item.is_empty() && !item.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn resolve(base: &Path, file: &Path) -> PathBuf {
    if file.is_absolute() {
        file.to_path_buf()
    } else {
        base.join(file)
    }
}

fn merge_list(target: &mut Vec<String>, file: &Path) -> Result<()> {
    let f = fs::File::open(file).map_err(|e| {
        ProxyError::Config(format!("Failed to open list file {}: {e}", file.display()))
    })?;
    let mut entries: Vec<String> = read_list(f)?
        .into_iter()
        .filter(|e| !target.contains(e))
        .collect();
    entries.sort();
    target.extend(entries);
    Ok(())
}

fn validate_config(cfg: &Config) -> Result<()> {
    if cfg.backends.is_empty() {
        return Err(ProxyError::NoBackends);
    }

    for backend in cfg.backends.iter().chain(std::iter::once(&cfg.overflow)) {
        validate_address(&backend.address)?;
    }

    if cfg.rate_limit.window_secs == 0 {
        return Err(ProxyError::Config("rate_limit.window_secs must be > 0".into()));
    }
    if cfg.rate_limit.ban_period_secs == 0 {
        return Err(ProxyError::Config("rate_limit.ban_period_secs must be > 0".into()));
    }
    if cfg.rate_limit.window_buckets == 0 {
        return Err(ProxyError::Config("rate_limit.window_buckets must be > 0".into()));
    }
    if cfg.traffic.flush_secs == 0 {
        return Err(ProxyError::Config("traffic.flush_secs must be > 0".into()));
    }
    if cfg.timeout.exchange_ms == 0 || cfg.timeout.upstream_ms == 0 || cfg.timeout.connect_ms == 0 {
        return Err(ProxyError::Config("timeout.connect_ms, upstream_ms and exchange_ms must be > 0".into()));
    }

    for ip in &cfg.bypass.source_ips {
        ip.parse::<IpAddr>()
            .map_err(|_| ProxyError::Config(format!("Invalid bypass source address: {ip}")))?;
    }

    let mut seen = HashSet::new();
    for name in cfg.headers.names() {
        HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ProxyError::Config(format!("Invalid header name: {name}")))?;
        if !seen.insert(name.to_ascii_lowercase()) {
            return Err(ProxyError::Config(format!("Duplicate injected header: {name}")));
        }
    }

    Ok(())
}

fn validate_address(address: &str) -> Result<()> {
    if address.trim().is_empty() {
        return Err(ProxyError::Config("backend address cannot be empty".into()));
    }
    let authority: http::uri::Authority = address
        .parse()
        .map_err(|e| ProxyError::Config(format!("Invalid backend address {address}: {e}")))?;
    if authority.port_u16().is_none() {
        return Err(ProxyError::Config(format!("Backend address {address} needs a port")));
    }
    Ok(())
}
