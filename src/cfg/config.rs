// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{
    fs,
    net::IpAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    pub tcp: TcpConfig,
    pub heartbeat: HeartbeatConfig,
    pub connection: ConnectionConfig,
    pub cache: CacheConfig,
    pub jwt: JwtConfig,
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub games: Vec<GameConfig>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TcpConfig {
    pub host: IpAddr,
    pub port: u16,
    pub max_connections: usize,
    #[serde(with = "serde_secs")]
    pub read_timeout: Duration,
    #[serde(with = "serde_secs")]
    pub write_timeout: Duration,
    #[serde(default)]
    pub debug: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    #[serde(with = "serde_secs")]
    pub interval: Duration,
    #[serde(with = "serde_secs")]
    pub timeout: Duration,
    pub max_missed: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ConnectionConfig {
    pub buffer_size: usize,
    #[serde(with = "serde_secs")]
    pub idle_timeout: Duration,
    #[serde(with = "serde_secs")]
    pub cleanup_interval: Duration,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CacheConfig {
    pub l1: L1Config,
    pub l2: L2Config,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct L1Config {
    pub enabled: bool,
    pub shards: usize,
    #[serde(with = "serde_secs")]
    pub life_window: Duration,
    #[serde(with = "serde_secs")]
    pub clean_window: Duration,
    pub max_entries_in_window: usize,
    pub max_entry_size: usize,
    pub hard_max_cache_size: usize,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct L2Config {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub db: u8,
    pub pool_size: usize,
    #[serde(with = "serde_secs")]
    pub dial_timeout: Duration,
    #[serde(with = "serde_secs")]
    pub read_timeout: Duration,
    #[serde(with = "serde_secs")]
    pub write_timeout: Duration,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    #[serde(with = "serde_secs")]
    pub expire: Duration,
    #[serde(default = "default_refresh_expire", with = "serde_secs")]
    pub refresh_expire: Duration,
}

fn default_refresh_expire() -> Duration {
    Duration::from_secs(7 * 24 * 3600)
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SchedulerConfig {
    pub queue_size: usize,
    pub workers: usize,
    #[serde(with = "serde_secs")]
    pub monitor_interval: Duration,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct GameConfig {
    pub id: String,
    pub enabled: bool,
    #[serde(default)]
    pub display_name: String,
}

const ENV_PREFIX: &str = "DATAMIDDLEWARE_";

/// Resolves a config path relative to the current working directory and
/// canonicalizes it, so errors from a missing or misconfigured path name
/// the absolute location that was actually probed.
fn resolve_path(rel: &Path) -> Result<PathBuf> {
    let abs = if rel.is_absolute() {
        rel.to_path_buf()
    } else {
        std::env::current_dir().context("cannot get current working dir")?.join(rel)
    };
    abs.canonicalize().with_context(|| format!("failed to canonicalize path {abs:?}"))
}

impl Config {
    /// Loads the configuration from YAML, applies the `DATAMIDDLEWARE_`
    /// environment overlay, validates it, and returns the ready-to-use
    /// value. `path` is resolved against the current working directory
    /// and canonicalized first, so a missing config file fails with the
    /// absolute path it was looked for at rather than whatever relative
    /// string the caller passed in.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let resolved = resolve_path(path.as_ref())?;
        let s = fs::read_to_string(&resolved).with_context(|| format!("failed to read config file {resolved:?}"))?;
        let mut value: serde_yaml::Value = serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        apply_env_overlay(&mut value, std::env::vars());
        let mut cfg: Config = serde_yaml::from_value(value).context("failed to apply config schema")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants that cannot be expressed in the type system.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(self.tcp.max_connections >= 1, "tcp.max_connections must be >= 1");
        ensure!(self.tcp.port > 0, "tcp.port must be nonzero");

        if self.heartbeat.enabled {
            ensure!(self.heartbeat.max_missed >= 1, "heartbeat.max_missed must be >= 1 when enabled");
            ensure!(
                self.heartbeat.timeout >= self.heartbeat.interval,
                "heartbeat.timeout must be >= heartbeat.interval"
            );
        }

        ensure!(self.connection.buffer_size >= 1, "connection.buffer_size must be >= 1");

        if self.cache.l2.enabled {
            ensure!(!self.cache.l2.host.is_empty(), "cache.l2.host is required when l2 is enabled");
            ensure!(self.cache.l2.pool_size >= 1, "cache.l2.pool_size must be >= 1");
        }

        ensure!(!self.jwt.secret.is_empty(), "jwt.secret must not be empty");
        ensure!(self.jwt.expire.as_secs() >= 1, "jwt.expire must be >= 1s");

        ensure!(self.scheduler.queue_size >= 1, "scheduler.queue_size must be >= 1");

        Ok(())
    }

    pub fn enabled_game_ids(&self) -> impl Iterator<Item = &str> {
        self.games.iter().filter(|g| g.enabled).map(|g| g.id.as_str())
    }
}

/// Overlays `DATAMIDDLEWARE_`-prefixed environment variables onto a parsed
/// config tree before it is deserialized into `Config`. A double underscore
/// separates nesting levels, lowercased to match the YAML keys, e.g.
/// `DATAMIDDLEWARE_TCP__PORT=9000` sets `tcp.port`. Values are coerced to
/// bool/int/float where they parse as such, else kept as strings.
fn apply_env_overlay(root: &mut serde_yaml::Value, vars: impl IntoIterator<Item = (String, String)>) {
    for (key, raw) in vars {
        let Some(rest) = key.strip_prefix(ENV_PREFIX) else { continue };
        let path: Vec<String> = rest.split("__").map(|segment| segment.to_lowercase()).collect();
        if path.is_empty() {
            continue;
        }
        set_path(root, &path, scalar_from_env(&raw));
    }
}

fn set_path(root: &mut serde_yaml::Value, path: &[String], value: serde_yaml::Value) {
    if !root.is_mapping() {
        *root = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
    }
    let mapping = root.as_mapping_mut().expect("forced to mapping above");
    let key = serde_yaml::Value::String(path[0].clone());

    if path.len() == 1 {
        mapping.insert(key, value);
        return;
    }

    let entry = mapping.entry(key).or_insert_with(|| serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
    set_path(entry, &path[1..], value);
}

fn scalar_from_env(raw: &str) -> serde_yaml::Value {
    if let Ok(b) = raw.parse::<bool>() {
        return serde_yaml::Value::Bool(b);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return serde_yaml::Value::Number(i.into());
    }
    if let Ok(f) = raw.parse::<f64>() {
        return serde_yaml::Value::Number(f.into());
    }
    serde_yaml::Value::String(raw.to_string())
}

/// Serde helpers for representing `Duration` as a number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        r#"
tcp:
  host: "0.0.0.0"
  port: 7000
  max_connections: 1000
  read_timeout: 30
  write_timeout: 30
heartbeat:
  enabled: true
  interval: 15
  timeout: 45
  max_missed: 3
connection:
  buffer_size: 4096
  idle_timeout: 300
  cleanup_interval: 60
cache:
  l1:
    enabled: true
    shards: 16
    life_window: 600
    clean_window: 60
    max_entries_in_window: 100000
    max_entry_size: 4096
    hard_max_cache_size: 268435456
  l2:
    enabled: false
    host: ""
    port: 6379
    pool_size: 10
    dial_timeout: 5
    read_timeout: 3
    write_timeout: 3
jwt:
  secret: "change-me"
  expire: 900
scheduler:
  queue_size: 10000
  workers: 4
  monitor_interval: 30
games:
  - id: chess
    enabled: true
"#
    }

    #[test]
    fn parses_and_validates_minimal_config() {
        let mut cfg: Config = serde_yaml::from_str(minimal_yaml()).expect("parse");
        cfg.validate_and_normalize().expect("valid");
        assert_eq!(cfg.tcp.port, 7000);
        assert_eq!(cfg.jwt.refresh_expire, Duration::from_secs(7 * 24 * 3600));
        assert_eq!(cfg.enabled_game_ids().collect::<Vec<_>>(), vec!["chess"]);
    }

    #[test]
    fn rejects_empty_jwt_secret() {
        let mut cfg: Config = serde_yaml::from_str(minimal_yaml()).expect("parse");
        cfg.jwt.secret.clear();
        assert!(cfg.validate_and_normalize().is_err());
    }

    #[test]
    fn env_overlay_sets_nested_scalar() {
        let mut value: serde_yaml::Value = serde_yaml::from_str(minimal_yaml()).expect("parse");
        apply_env_overlay(&mut value, [("DATAMIDDLEWARE_TCP__PORT".to_string(), "9100".to_string())]);
        let cfg: Config = serde_yaml::from_value(value).expect("schema");
        assert_eq!(cfg.tcp.port, 9100);
    }

    #[test]
    fn env_overlay_ignores_unprefixed_vars() {
        let mut value: serde_yaml::Value = serde_yaml::from_str(minimal_yaml()).expect("parse");
        apply_env_overlay(&mut value, [("PATH".to_string(), "/usr/bin".to_string())]);
        let cfg: Config = serde_yaml::from_value(value).expect("schema");
        assert_eq!(cfg.tcp.port, 7000);
    }

    #[test]
    fn load_from_file_reports_the_absolute_path_it_looked_for() {
        let err = Config::load_from_file("does/not/exist.yaml").expect_err("missing file");
        assert!(err.to_string().contains("does/not/exist.yaml") || err.chain().any(|c| c.to_string().contains("does/not/exist.yaml")));
    }

    #[test]
    fn rejects_inverted_heartbeat_timeout() {
        let mut cfg: Config = serde_yaml::from_str(minimal_yaml()).expect("parse");
        cfg.heartbeat.timeout = Duration::from_secs(1);
        cfg.heartbeat.interval = Duration::from_secs(5);
        assert!(cfg.validate_and_normalize().is_err());
    }
}
