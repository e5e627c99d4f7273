use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::ChatrConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["chatr.toml", "chatr.yaml", "chatr.yml", "chatr.json"];

/// Load config from the given path (any supported format).
///
/// The parsed file is merged over the built-in defaults, then per-option
/// environment overrides are applied.
pub fn load_config(path: &Path) -> anyhow::Result<ChatrConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    let file_value = parse_config_value(&raw, path)?;
    build(Some(file_value))
}

/// Discover and load config from standard locations.
///
/// Search order: `./chatr.{toml,yaml,yml,json}`, then `./config/`.
/// A missing file yields the defaults (still subject to env overrides);
/// a file that fails to parse is a startup error.
pub fn discover_and_load() -> anyhow::Result<ChatrConfig> {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        return load_config(&path);
    }
    debug!("no config file found, using defaults");
    build(None)
}

fn find_config_file() -> Option<PathBuf> {
    for dir in ["", "config"] {
        for name in CONFIG_FILENAMES {
            let p = Path::new(dir).join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }
    None
}

fn build(file_value: Option<serde_json::Value>) -> anyhow::Result<ChatrConfig> {
    let mut value = serde_json::to_value(ChatrConfig::default())?;
    if let Some(overlay) = file_value {
        deep_merge(&mut value, overlay);
    }
    let mut path = Vec::new();
    apply_env_overrides(&mut value, &mut path, &|name| std::env::var(name).ok());
    Ok(serde_json::from_value(value)?)
}

fn parse_config_value(raw: &str, path: &Path) -> anyhow::Result<serde_json::Value> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => {
            let v: toml::Value = toml::from_str(raw)?;
            Ok(serde_json::to_value(v)?)
        },
        "yaml" | "yml" => {
            let v: serde_yaml::Value = serde_yaml::from_str(raw)?;
            Ok(serde_json::to_value(v)?)
        },
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

/// Overlay `other` onto `base`, object by object.
fn deep_merge(base: &mut serde_json::Value, other: serde_json::Value) {
    match (base, other) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(other_map)) => {
            for (key, value) in other_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    },
                }
            }
        },
        (base_slot, other_value) => *base_slot = other_value,
    }
}

/// Override leaf options from the environment. The variable name is the
/// option path joined with underscores and upper-cased:
/// `chat.message.maxNum` → `CHAT_MESSAGE_MAXNUM`.
///
/// The lookup is injected so tests don't have to mutate the process
/// environment.
fn apply_env_overrides(
    value: &mut serde_json::Value,
    path: &mut Vec<String>,
    lookup: &dyn Fn(&str) -> Option<String>,
) {
    if let serde_json::Value::Object(map) = value {
        for (key, child) in map.iter_mut() {
            path.push(key.clone());
            apply_env_overrides(child, path, lookup);
            path.pop();
        }
        return;
    }

    let name = path.join("_").to_uppercase();
    let Some(raw) = lookup(&name) else {
        return;
    };
    *value = coerce_env_value(&name, &raw, value);
}

fn coerce_env_value(
    name: &str,
    raw: &str,
    current: &serde_json::Value,
) -> serde_json::Value {
    match current {
        serde_json::Value::Number(_) => match raw.parse::<i64>() {
            Ok(n) => serde_json::Value::from(n),
            Err(_) => {
                warn!(var = name, value = raw, "ignoring non-numeric env override");
                current.clone()
            },
        },
        serde_json::Value::Bool(_) => match raw.parse::<bool>() {
            Ok(b) => serde_json::Value::Bool(b),
            Err(_) => {
                warn!(var = name, value = raw, "ignoring non-boolean env override");
                current.clone()
            },
        },
        _ => serde_json::Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_yaml_over_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("chatr.yaml");
        std::fs::write(
            &path,
            "chat:\n  message:\n    maxNum: 2\n  jwt:\n    secret: s3cret\n",
        )
        .expect("write config");

        let config = load_config(&path).expect("load");
        assert_eq!(config.chat.message.max_num, 2);
        assert_eq!(config.chat.jwt.secret, "s3cret");
        // Untouched options keep their defaults.
        assert_eq!(config.chat.message.max_size_byte, 4096);
    }

    #[test]
    fn loads_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("chatr.toml");
        std::fs::write(&path, "[redis]\naddress = \"redis:6379\"\npoolSize = 8\n")
            .expect("write config");

        let config = load_config(&path).expect("load");
        assert_eq!(config.redis.address, "redis:6379");
        assert_eq!(config.redis.pool_size, 8);
    }

    #[test]
    fn rejects_malformed_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("chatr.json");
        std::fs::write(&path, "{ not json").expect("write config");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn env_override_takes_precedence() {
        let mut value =
            serde_json::to_value(ChatrConfig::default()).expect("to_value");
        let lookup = |name: &str| match name {
            "CHAT_MESSAGE_PAGINATIONNUM" => Some("25".to_string()),
            "REDIS_ADDRESS" => Some("redis-primary:6379".to_string()),
            _ => None,
        };
        apply_env_overrides(&mut value, &mut Vec::new(), &lookup);

        let config: ChatrConfig =
            serde_json::from_value(value).expect("from_value");
        assert_eq!(config.chat.message.pagination_num, 25);
        assert_eq!(config.redis.address, "redis-primary:6379");
    }

    #[test]
    fn malformed_numeric_override_is_ignored() {
        let mut value =
            serde_json::to_value(ChatrConfig::default()).expect("to_value");
        let lookup = |name: &str| {
            (name == "CHAT_MESSAGE_MAXNUM").then(|| "not-a-number".to_string())
        };
        apply_env_overrides(&mut value, &mut Vec::new(), &lookup);

        let config: ChatrConfig =
            serde_json::from_value(value).expect("from_value");
        assert_eq!(config.chat.message.max_num, 5000);
    }
}
