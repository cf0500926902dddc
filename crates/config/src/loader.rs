use std::path::{Path, PathBuf};

use {serde_json::Value, tracing::debug};

use crate::{
    Error, Result,
    env_subst::substitute_env,
    schema::{RobotConfig, TaskConfig},
};

/// Supported extensions, checked in order.
const EXTENSIONS: &[&str] = &["yaml", "yml", "toml", "json"];

/// Environment override for the configuration directory.
pub const CONFIG_DIR_ENV: &str = "GOPHER_CONFIGDIR";

/// `--config-dir`, then `GOPHER_CONFIGDIR`, then the working directory.
pub fn resolve_config_dir(explicit: Option<&Path>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir.to_path_buf();
    }
    match std::env::var(CONFIG_DIR_ENV) {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from("."),
    }
}

fn find_with_stem(dir: &Path, stem: &str) -> Option<PathBuf> {
    EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{stem}.{ext}")))
        .find(|p| p.is_file())
}

/// `conf/robot.{yaml,yml,toml,json}` under `root`.
pub fn find_robot_file(root: &Path) -> Option<PathBuf> {
    find_with_stem(&root.join("conf"), "robot")
}

/// Parse raw text into a JSON value by the file's extension.
pub fn parse_value(raw: &str, path: &Path) -> Result<Value> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("yaml");
    match ext {
        "yaml" | "yml" => {
            // An empty YAML document is a valid, empty configuration.
            if raw.trim().is_empty() {
                return Ok(Value::Object(Default::default()));
            }
            let v: serde_yaml::Value =
                serde_yaml::from_str(raw).map_err(|e| Error::parse(path, e))?;
            Ok(serde_json::to_value(v)?)
        },
        "toml" => {
            let v: toml::Value = toml::from_str(raw).map_err(|e| Error::parse(path, e))?;
            Ok(serde_json::to_value(v)?)
        },
        "json" => serde_json::from_str(raw).map_err(|e| Error::parse(path, e)),
        other => Err(Error::UnsupportedFormat {
            ext: other.to_string(),
        }),
    }
}

/// Read a config file, substitute `${VAR}` placeholders and parse it.
pub fn load_config_value(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_value(&substitute_env(&raw), path)
}

/// Deserialize a parsed value, attributing failures to `path`.
pub fn from_value<T: serde::de::DeserializeOwned>(value: Value, path: &Path) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::parse(path, e))
}

pub fn load_robot_config(root: &Path) -> Result<RobotConfig> {
    let path = find_robot_file(root).ok_or_else(|| Error::NotFound {
        dir: root.join("conf"),
    })?;
    debug!(path = %path.display(), "loading robot configuration");
    let value = load_config_value(&path)?;
    from_value(value, &path)
}

/// A task's built-in default YAML overlaid by `conf/<kind_dir>/<name>.*`
/// when present. Returns the merged value and the file it came from.
pub fn load_task_value(
    root: &Path,
    kind_dir: &str,
    name: &str,
    default_yaml: &str,
) -> Result<(Value, PathBuf)> {
    let default_path = PathBuf::from(format!("<default {name}>.yaml"));
    let mut value = parse_value(default_yaml, &default_path)?;
    let dir = root.join("conf").join(kind_dir);
    match find_with_stem(&dir, name) {
        Some(path) => {
            debug!(task = name, path = %path.display(), "loading task configuration");
            merge_task_values(&mut value, load_config_value(&path)?);
            Ok((value, path))
        },
        None => Ok((value, default_path)),
    }
}

pub fn load_task_config(
    root: &Path,
    kind_dir: &str,
    name: &str,
    default_yaml: &str,
) -> Result<TaskConfig> {
    let (value, source) = load_task_value(root, kind_dir, name, default_yaml)?;
    from_value(value, &source)
}

/// Overlay `overlay` onto `base`. Top-level keys replace; the free-form
/// `Config` block merges recursively.
pub fn merge_task_values(base: &mut Value, overlay: Value) {
    let Value::Object(overlay) = overlay else {
        return;
    };
    if !base.is_object() {
        *base = Value::Object(Default::default());
    }
    let Some(base) = base.as_object_mut() else {
        return;
    };
    for (key, value) in overlay {
        if key == "Config"
            && let Some(existing) = base.get_mut("Config")
        {
            merge_deep(existing, value);
        } else {
            base.insert(key, value);
        }
    }
}

fn merge_deep(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(b), Value::Object(o)) => {
            for (key, value) in o {
                match b.get_mut(&key) {
                    Some(existing) => merge_deep(existing, value),
                    None => {
                        b.insert(key, value);
                    },
                }
            }
        },
        (b, o) => *b = o,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json, tempfile::TempDir};

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    #[test]
    fn robot_file_formats() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "conf/robot.toml", "Name = \"floyd\"\nAlias = \"*\"\n");
        let cfg = load_robot_config(tmp.path()).unwrap();
        assert_eq!(cfg.name, "floyd");
        assert_eq!(cfg.alias_char(), Some('*'));
    }

    #[test]
    fn yaml_preferred_over_json() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "conf/robot.json", r#"{"Name": "json"}"#);
        write(tmp.path(), "conf/robot.yaml", "Name: yaml\n");
        assert_eq!(load_robot_config(tmp.path()).unwrap().name, "yaml");
    }

    #[test]
    fn missing_robot_file() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            load_robot_config(tmp.path()),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn parse_error_names_file() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "conf/robot.yaml", "Name: [unterminated\n");
        let err = load_robot_config(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("robot.yaml"), "{err}");
    }

    #[test]
    fn task_overlay_merges_config_deeply() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "conf/plugins/lists.yaml",
            "Channels: [ops]\nConfig:\n  Scope: channel\n",
        );
        let default = "Channels: [general]\nAllowDirect: true\nConfig:\n  Scope: global\n  Limit: 5\n";
        let tc = load_task_config(tmp.path(), "plugins", "lists", default).unwrap();
        assert_eq!(tc.channels, vec!["ops"]);
        assert_eq!(tc.allow_direct, Some(true));
        assert_eq!(tc.config, json!({"Scope": "channel", "Limit": 5}));
    }

    #[test]
    fn task_without_overlay_uses_default() {
        let tmp = TempDir::new().unwrap();
        let tc = load_task_config(tmp.path(), "plugins", "ping", "Description: ping\n").unwrap();
        assert_eq!(tc.description, "ping");
        let empty = load_task_config(tmp.path(), "jobs", "none", "").unwrap();
        assert!(empty.channels.is_empty());
    }

    #[test]
    fn merge_replaces_top_level_lists() {
        let mut base = json!({"Users": ["a", "b"], "Config": {"X": {"Y": 1}}});
        merge_task_values(&mut base, json!({"Users": ["c"], "Config": {"X": {"Z": 2}}}));
        assert_eq!(
            base,
            json!({"Users": ["c"], "Config": {"X": {"Y": 1, "Z": 2}}})
        );
    }
}
