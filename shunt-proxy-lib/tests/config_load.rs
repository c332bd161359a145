use std::fs;
use std::io::Write;

use shunt_proxy_lib::config::{load_from_path, load_from_str, read_list, BackendHttpVersion};
use shunt_proxy_lib::ProxyError;
use tempfile::{tempdir, NamedTempFile};

type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

const MINIMAL: &str = r#"
listen = "127.0.0.1:0"
backends = [
  { address = "127.0.0.1:9001" }
]
overflow = { address = "127.0.0.1:9100" }
"#;

#[test]
fn loads_minimal_config_with_defaults() -> TestResult {
    let mut file = NamedTempFile::new()?;
    file.write_all(MINIMAL.as_bytes())?;

    let cfg = load_from_path(file.path())?;
    assert_eq!(cfg.listen.to_string(), "127.0.0.1:0");
    assert_eq!(cfg.backends.len(), 1);
    assert_eq!(cfg.overflow.address, "127.0.0.1:9100");
    assert_eq!(cfg.overflow.version(), BackendHttpVersion::Http11);

    assert_eq!(cfg.rate_limit.window_secs, 10);
    assert_eq!(cfg.rate_limit.max_requests, 10);
    assert_eq!(cfg.rate_limit.ban_period_secs, 600);
    assert!(cfg.bypass.appids.is_empty());
    assert!(cfg.bypass.source_ips.is_empty());
    assert!(cfg.traffic.statsd_addr.is_none());
    assert_eq!(cfg.traffic.flush_secs, 10);
    assert_eq!(cfg.headers.identity, "x-lb-uid");
    assert_eq!(cfg.headers.override_target, "x-lb-override");
    assert_eq!(cfg.headers.trusted_source, "x-lb-trusted-source");
    assert_eq!(cfg.timeout.exchange_ms, 1000);
    assert_eq!(cfg.limits.max_body_bytes, 10 * 1024 * 1024);
    assert!(cfg.telemetry.metrics_port.is_none());
    assert_eq!(cfg.logging.level, "info");
    Ok(())
}

#[test]
fn loads_full_config() -> TestResult {
    let txt = r#"
listen = "0.0.0.0:8080"
backends = [
  { address = "10.0.0.1:9001" },
  { address = "10.0.0.2:9001", http_version = "http2" }
]
overflow = { address = "10.0.0.9:9001" }

[rate_limit]
window_secs = 30
max_requests = 50
ban_period_secs = 120
window_buckets = 6

[bypass]
appids = ["internal"]

[traffic]
statsd_addr = "127.0.0.1:8125"
flush_secs = 5
monitored_appids = ["web", "ios"]
namespace = "lb."
tags = ["module:lb", "env:test"]

[headers]
identity = "x-user-key"

[timeout]
exchange_ms = 250
upstream_ms = 2000
"#;
    let cfg = load_from_str(txt, std::path::Path::new("."))?;
    assert_eq!(cfg.backends[1].version(), BackendHttpVersion::Http2);
    assert_eq!(cfg.rate_limit.max_requests, 50);
    assert_eq!(cfg.rate_limit.window_buckets, 6);
    assert_eq!(cfg.bypass.appids, vec!["internal"]);
    assert_eq!(cfg.traffic.statsd_addr.as_deref(), Some("127.0.0.1:8125"));
    assert_eq!(cfg.traffic.monitored_appids, vec!["web", "ios"]);
    assert_eq!(cfg.traffic.tags, vec!["module:lb", "env:test"]);
    assert_eq!(cfg.headers.identity, "x-user-key");
    assert_eq!(cfg.headers.appid, "x-openapi-appid");
    assert_eq!(cfg.timeout.exchange_ms, 250);
    assert_eq!(cfg.timeout.connect_ms, 5000);
    Ok(())
}

#[test]
fn list_files_are_merged_relative_to_config() -> TestResult {
    let dir = tempdir()?;
    fs::write(dir.path().join("bypass.txt"), "# internal callers\nops\n\n  batch  \nops\n")?;
    fs::write(dir.path().join("monitored.txt"), "web\nandroid\n")?;
    fs::write(dir.path().join("sources.txt"), "# office\n10.0.0.7\n::1\n")?;

    let config_path = dir.path().join("shunt.toml");
    fs::write(
        &config_path,
        format!(
            "{MINIMAL}\n[bypass]\nappids = [\"ops\"]\nappids_file = \"bypass.txt\"\n\
             source_ips = [\"10.0.0.7\"]\nsource_ips_file = \"sources.txt\"\n\n\
             [traffic]\nmonitored_appids = [\"web\"]\nmonitored_appids_file = \"monitored.txt\"\n"
        ),
    )?;

    let cfg = load_from_path(&config_path)?;
    assert_eq!(cfg.bypass.appids, vec!["ops", "batch"]);
    assert_eq!(cfg.bypass.source_ips, vec!["10.0.0.7", "::1"]);
    assert_eq!(cfg.traffic.monitored_appids, vec!["web", "android"]);
    Ok(())
}

#[test]
fn read_list_skips_comments_and_blank_lines() -> TestResult {
    let list = read_list("a\n# b\n\n c \na\n".as_bytes())?;
    assert_eq!(list.len(), 2);
    assert!(list.contains("a"));
    assert!(list.contains("c"));
    Ok(())
}

#[test]
fn missing_list_file_is_a_config_error() {
    let txt = format!("{MINIMAL}\n[bypass]\nappids_file = \"does-not-exist.txt\"\n");
    let dir = std::env::temp_dir();
    assert!(matches!(load_from_str(&txt, &dir), Err(ProxyError::Config(_))));
}

#[test]
fn empty_backend_pool_is_rejected() {
    let txt = r#"
listen = "127.0.0.1:0"
backends = []
overflow = { address = "127.0.0.1:9100" }
"#;
    assert!(matches!(load_from_str(txt, std::path::Path::new(".")), Err(ProxyError::NoBackends)));
}

#[test]
fn missing_overflow_is_rejected() {
    let txt = r#"
listen = "127.0.0.1:0"
backends = [{ address = "127.0.0.1:9001" }]
"#;
    assert!(matches!(load_from_str(txt, std::path::Path::new(".")), Err(ProxyError::Config(_))));
}

#[test]
fn invalid_values_are_rejected() {
    let base = std::path::Path::new(".");
    let cases = [
        "[rate_limit]\nwindow_secs = 0\n",
        "[rate_limit]\nban_period_secs = 0\n",
        "[rate_limit]\nwindow_buckets = 0\n",
        "[traffic]\nflush_secs = 0\n",
        "[timeout]\nexchange_ms = 0\n",
        "[headers]\nidentity = \"bad header\"\n",
        "[headers]\nappid = \"X-LB-UID\"\n",
        "[headers]\ntrusted_source = \"x-lb-bypass\"\n",
        "[bypass]\nsource_ips = [\"10.0.0.300\"]\n",
        "[bypass]\nsource_ips = [\"10.0.0.0/8\"]\n",
    ];
    for case in cases {
        let txt = format!("{MINIMAL}\n{case}");
        assert!(
            matches!(load_from_str(&txt, base), Err(ProxyError::Config(_))),
            "accepted invalid config: {case}"
        );
    }

    let no_port = MINIMAL.replace("127.0.0.1:9100", "overflow-host");
    assert!(matches!(load_from_str(&no_port, base), Err(ProxyError::Config(_))));
}

#[test]
fn shipped_config_is_valid() -> TestResult {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../config/shunt.toml");
    let cfg = load_from_path(path)?;
    assert_eq!(cfg.backends.len(), 2);
    assert!(cfg.bypass.appids.is_empty());
    assert_eq!(cfg.telemetry.metrics_port, Some(9090));
    Ok(())
}
