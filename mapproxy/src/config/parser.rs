//! Maps INI keys onto [`ConfigFile`] fields.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use ini::{Ini, Properties};

use super::{ConfigError, ConfigFile};

/// Overlays the values found in `ini` onto the defaults.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigError> {
    let mut config = ConfigFile::default();

    if let Some(section) = ini.section(Some("http")) {
        if let Some(v) = section.get("listen") {
            config.http.listen = parse_value::<SocketAddr>("http", "listen", v, "expected host:port")?;
        }
    }

    if let Some(section) = ini.section(Some("generators")) {
        if let Some(path) = path_value(section, "root") {
            config.generators.root = path;
        }
        if let Some(path) = path_value(section, "resource_root") {
            config.generators.resource_root = path;
        }
        if let Some(v) = section.get("update_period") {
            let secs = parse_value::<u64>("generators", "update_period", v, "must be a positive integer (seconds)")?;
            if secs == 0 {
                return Err(invalid("generators", "update_period", v, "must be a positive integer (seconds)"));
            }
            config.generators.update_period = Duration::from_secs(secs);
        }
        if let Some(v) = section.get("browser") {
            config.generators.browser = parse_bool("generators", "browser", v)?;
        }
    }

    if let Some(section) = ini.section(Some("resources")) {
        if let Some(path) = path_value(section, "definitions") {
            config.resources.definitions = path;
        }
        if let Some(path) = path_value(section, "reference_frames") {
            config.resources.reference_frames = path;
        }
        config.resources.data_files = path_value(section, "data_files");
    }

    if let Some(section) = ini.section(Some("arsenal")) {
        if let Some(v) = section.get("workers") {
            let workers = parse_value::<usize>("arsenal", "workers", v, "must be a positive integer")?;
            if workers == 0 {
                return Err(invalid("arsenal", "workers", v, "must be a positive integer"));
            }
            config.arsenal.workers = workers;
        }
    }

    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("level") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.level = v.to_string();
            }
        }
        config.logging.directory = path_value(section, "directory");
    }

    Ok(config)
}

fn parse_value<T: FromStr>(section: &str, key: &str, value: &str, reason: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| invalid(section, key, value, reason))
}

/// Strict boolean: unknown spellings are rejected.
fn parse_bool(section: &str, key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(section, key, value, "must be true or false")),
    }
}

fn path_value(section: &Properties, key: &str) -> Option<PathBuf> {
    section
        .get(key)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(expand_tilde)
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Expands a leading `~/` to the home directory.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<ConfigFile, ConfigError> {
        ConfigFile::parse(content)
    }

    #[test]
    fn test_full_config() {
        let config = parse(
            r#"
[http]
listen = 0.0.0.0:3080

[generators]
root = /var/lib/mapproxy/store
resource_root = /var/lib/mapproxy
update_period = 30
browser = off

[resources]
definitions = /etc/mapproxy/resources.json
reference_frames = /etc/mapproxy/referenceframes.json
data_files = /etc/mapproxy/datafiles.json

[arsenal]
workers = 3

[logging]
level = debug
directory = /var/log/mapproxy
"#,
        )
        .unwrap();

        assert_eq!(config.http.listen.port(), 3080);
        assert_eq!(config.generators.root, PathBuf::from("/var/lib/mapproxy/store"));
        assert_eq!(config.generators.update_period, Duration::from_secs(30));
        assert!(!config.generators.browser);
        assert_eq!(
            config.resources.data_files,
            Some(PathBuf::from("/etc/mapproxy/datafiles.json"))
        );
        assert_eq!(config.arsenal.workers, 3);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.directory, Some(PathBuf::from("/var/log/mapproxy")));
    }

    #[test]
    fn test_invalid_bool() {
        let err = parse("[generators]\nbrowser = maybe\n").unwrap_err();
        match err {
            ConfigError::InvalidValue { section, key, .. } => {
                assert_eq!(section, "generators");
                assert_eq!(key, "browser");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_invalid_numbers() {
        assert!(matches!(
            parse("[arsenal]\nworkers = many\n"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            parse("[arsenal]\nworkers = 0\n"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            parse("[generators]\nupdate_period = -5\n"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            parse("[http]\nlisten = localhost\n"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_empty_values_keep_defaults() {
        let config = parse("[logging]\nlevel =\ndirectory =\n").unwrap();
        assert_eq!(config.logging.level, "info");
        assert!(config.logging.directory.is_none());
    }

    #[test]
    fn test_expand_tilde() {
        let path = expand_tilde("~/store");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(path, home.join("store"));
        }
        assert_eq!(expand_tilde("/abs/store"), PathBuf::from("/abs/store"));
    }
}
