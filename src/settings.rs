//! Operator settings persistence.
//!
//! Stores operator preferences in ~/.olas-operate/settings.json, with an
//! optional ~/.olas-operate/config.toml overlay.
//! Settings are loaded with env var > config.toml > settings.json > default priority.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Operator settings persisted to disk.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    /// Backend service API.
    #[serde(default)]
    pub backend: BackendSettings,

    /// Chain RPC and operator wallet.
    #[serde(default)]
    pub chain: ChainSettings,

    /// Funding verification cadence.
    #[serde(default)]
    pub funding: FundingSettings,
}

/// Backend service API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendSettings {
    /// Base URL of the operate backend.
    #[serde(default = "default_backend_url")]
    pub url: String,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_backend_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Chain RPC and wallet settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainSettings {
    /// JSON-RPC endpoint used for balance lookups.
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// Operator wallet whose balance gates starting the service.
    #[serde(default)]
    pub wallet_address: Option<String>,

    /// ERC-20 contract of the staking token.
    #[serde(default = "default_staking_token_address")]
    pub staking_token_address: String,

    /// Minimum native balance required before the service may be started.
    #[serde(default = "default_min_start_balance")]
    pub min_start_balance: String,
}

fn default_rpc_url() -> String {
    "http://localhost:8545".to_string()
}

fn default_staking_token_address() -> String {
    // OLAS on Gnosis chain.
    "0xce11e14225575945b8e6dc0d4f2dd4c570f79d9f".to_string()
}

fn default_min_start_balance() -> String {
    "1".to_string()
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            wallet_address: None,
            staking_token_address: default_staking_token_address(),
            min_start_balance: default_min_start_balance(),
        }
    }
}

/// Funding verification cadence settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FundingSettings {
    /// Interval between balance checks while waiting for funds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Upper bound for the backoff applied while the RPC is unreachable.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Give up waiting after this many seconds. Unset waits indefinitely.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Interval between operator wallet balance refreshes.
    #[serde(default = "default_balance_refresh_ms")]
    pub balance_refresh_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

fn default_balance_refresh_ms() -> u64 {
    10_000
}

impl Default for FundingSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            timeout_secs: None,
            balance_refresh_ms: default_balance_refresh_ms(),
        }
    }
}

impl Settings {
    /// Get the default settings file path (~/.olas-operate/settings.json).
    pub fn default_path() -> PathBuf {
        crate::bootstrap::operate_home().join("settings.json")
    }

    /// Load settings from disk, returning default if not found.
    pub fn load() -> Self {
        Self::load_from(&Self::default_path())
    }

    /// Load settings from a specific path.
    pub fn load_from(path: &std::path::Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(data) => serde_json::from_str(&data).unwrap_or_else(|e| {
                tracing::warn!("Ignoring malformed settings file {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &std::path::Path) -> Result<(), String> {
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| format!("failed to serialize settings: {}", e))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("failed to create {}: {}", parent.display(), e))?;
        }
        std::fs::write(path, data).map_err(|e| format!("failed to write {}: {}", path.display(), e))
    }

    /// Default TOML config file path (~/.olas-operate/config.toml).
    pub fn default_toml_path() -> PathBuf {
        crate::bootstrap::operate_home().join("config.toml")
    }

    /// Load settings from a TOML file.
    ///
    /// Returns `None` if the file doesn't exist. Returns an error only
    /// if the file exists but can't be parsed.
    pub fn load_toml(path: &std::path::Path) -> Result<Option<Self>, String> {
        let data = match std::fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(format!("failed to read {}: {}", path.display(), e)),
        };

        let settings: Self = toml::from_str(&data)
            .map_err(|e| format!("invalid TOML in {}: {}", path.display(), e))?;
        Ok(Some(settings))
    }

    /// Merge values from `other` into `self`, preferring `other` for
    /// fields that differ from the default.
    pub fn merge_from(&mut self, other: &Self) {
        let default_json = match serde_json::to_value(Self::default()) {
            Ok(v) => v,
            Err(_) => return,
        };
        let other_json = match serde_json::to_value(other) {
            Ok(v) => v,
            Err(_) => return,
        };
        let mut self_json = match serde_json::to_value(&*self) {
            Ok(v) => v,
            Err(_) => return,
        };

        merge_non_default(&mut self_json, &other_json, &default_json);

        if let Ok(merged) = serde_json::from_value(self_json) {
            *self = merged;
        }
    }

    /// Get a setting value by dotted path (e.g., "chain.rpc_url").
    pub fn get(&self, path: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;

        for part in path.split('.') {
            current = current.get(part)?;
        }

        match current {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            serde_json::Value::Null => Some("null".to_string()),
            other => Some(other.to_string()),
        }
    }

    /// Set a setting value by dotted path.
    ///
    /// The existing value decides how `value` is parsed. `null` clears
    /// optional fields.
    pub fn set(&mut self, path: &str, value: &str) -> Result<(), String> {
        let mut json = serde_json::to_value(&*self)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;

        let parts: Vec<&str> = path.split('.').collect();
        let Some((final_key, parents)) = parts.split_last() else {
            return Err("Empty path".to_string());
        };

        let mut current = &mut json;
        for part in parents {
            current = current
                .get_mut(*part)
                .ok_or_else(|| format!("Path not found: {}", path))?;
        }

        let obj = current
            .as_object_mut()
            .ok_or_else(|| format!("Parent is not an object: {}", path))?;
        let existing = obj
            .get(*final_key)
            .ok_or_else(|| format!("Unknown setting: {}", path))?;

        let new_value = match existing {
            _ if value == "null" => serde_json::Value::Null,
            serde_json::Value::Bool(_) => {
                let b = value
                    .parse::<bool>()
                    .map_err(|_| format!("Expected boolean for {}, got '{}'", path, value))?;
                serde_json::Value::Bool(b)
            }
            serde_json::Value::Number(_) => {
                let n = value
                    .parse::<u64>()
                    .map_err(|_| format!("Expected integer for {}, got '{}'", path, value))?;
                serde_json::Value::Number(n.into())
            }
            serde_json::Value::Null => serde_json::from_str(value)
                .unwrap_or(serde_json::Value::String(value.to_string())),
            _ => serde_json::Value::String(value.to_string()),
        };

        obj.insert((*final_key).to_string(), new_value);

        *self =
            serde_json::from_value(json).map_err(|e| format!("Failed to apply setting: {}", e))?;

        Ok(())
    }

    /// Reset a setting to its default value.
    pub fn reset(&mut self, path: &str) -> Result<(), String> {
        let default_value = Self::default()
            .get(path)
            .ok_or_else(|| format!("Unknown setting: {}", path))?;

        self.set(path, &default_value)
    }

    /// List all settings as (path, value) pairs.
    pub fn list(&self) -> Vec<(String, String)> {
        let json = match serde_json::to_value(self) {
            Ok(v) => v,
            Err(_) => return Vec::new(),
        };

        let mut results = Vec::new();
        collect_settings(&json, String::new(), &mut results);
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }
}

/// Recursively collect settings paths and values.
fn collect_settings(
    value: &serde_json::Value,
    prefix: String,
    results: &mut Vec<(String, String)>,
) {
    match value {
        serde_json::Value::Object(obj) => {
            for (key, val) in obj {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                collect_settings(val, path, results);
            }
        }
        serde_json::Value::String(s) => results.push((prefix, s.clone())),
        serde_json::Value::Null => results.push((prefix, "null".to_string())),
        other => results.push((prefix, other.to_string())),
    }
}

/// Recursively merge `other` into `target`, but only for fields where
/// `other` differs from `defaults`.
fn merge_non_default(
    target: &mut serde_json::Value,
    other: &serde_json::Value,
    defaults: &serde_json::Value,
) {
    match (target, other, defaults) {
        (
            serde_json::Value::Object(t),
            serde_json::Value::Object(o),
            serde_json::Value::Object(d),
        ) => {
            for (key, other_val) in o {
                let default_val = d.get(key).cloned().unwrap_or(serde_json::Value::Null);
                if let Some(target_val) = t.get_mut(key) {
                    merge_non_default(target_val, other_val, &default_val);
                } else if other_val != &default_val {
                    t.insert(key.clone(), other_val.clone());
                }
            }
        }
        (target, other, defaults) => {
            if other != defaults {
                *target = other.clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_get_setting() {
        let settings = Settings::default();

        assert_eq!(
            settings.get("backend.url"),
            Some("http://localhost:8000".to_string())
        );
        assert_eq!(
            settings.get("funding.poll_interval_ms"),
            Some("5000".to_string())
        );
        assert_eq!(settings.get("chain.wallet_address"), Some("null".to_string()));
        assert_eq!(settings.get("nonexistent"), None);
    }

    #[test]
    fn test_set_and_reset_setting() {
        let mut settings = Settings::default();

        settings.set("funding.poll_interval_ms", "250").unwrap();
        assert_eq!(settings.funding.poll_interval_ms, 250);

        settings
            .set("chain.wallet_address", "0xabc0000000000000000000000000000000000001")
            .unwrap();
        assert_eq!(
            settings.chain.wallet_address.as_deref(),
            Some("0xabc0000000000000000000000000000000000001")
        );

        settings.set("funding.timeout_secs", "600").unwrap();
        assert_eq!(settings.funding.timeout_secs, Some(600));

        assert!(settings.set("funding.poll_interval_ms", "soon").is_err());
        assert!(settings.set("funding.unknown", "1").is_err());

        settings.reset("funding.poll_interval_ms").unwrap();
        assert_eq!(settings.funding.poll_interval_ms, 5_000);

        settings.reset("funding.timeout_secs").unwrap();
        assert_eq!(settings.funding.timeout_secs, None);
    }

    #[test]
    fn test_list_settings_is_sorted() {
        let list = Settings::default().list();
        assert!(list.iter().any(|(k, _)| k == "chain.rpc_url"));
        let keys: Vec<_> = list.iter().map(|(k, _)| k.clone()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_toml_overlay_only_applies_non_default_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[chain]\nrpc_url = \"https://rpc.gnosischain.com\"\n",
        )
        .unwrap();

        let mut base = Settings::default();
        base.backend.url = "http://10.0.0.2:8000".to_string();

        let overlay = Settings::load_toml(&path).unwrap().unwrap();
        base.merge_from(&overlay);

        assert_eq!(base.chain.rpc_url, "https://rpc.gnosischain.com");
        assert_eq!(base.backend.url, "http://10.0.0.2:8000");
    }

    #[test]
    fn test_missing_toml_is_none() {
        let dir = tempdir().unwrap();
        assert!(
            Settings::load_toml(&dir.path().join("absent.toml"))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut settings = Settings::default();
        settings.funding.timeout_secs = Some(900);
        settings.save_to(&path).unwrap();

        assert_eq!(Settings::load_from(&path), settings);
    }
}
