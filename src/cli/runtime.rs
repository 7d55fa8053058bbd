use std::env;
use std::fs as stdfs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::GoldpathConfig;

const LOCAL_ENV_FILE: &str = "config/local.env";
const LOCAL_CONFIG_FILE: &str = "config/goldpath.yaml";

/// Load `config/local.env` KEY=VALUE pairs into the environment. Variables that are already set
/// win.
pub fn load_local_env_overrides() {
    let path = Path::new(LOCAL_ENV_FILE);
    if !path.exists() {
        return;
    }

    match stdfs::read_to_string(path) {
        Ok(contents) => {
            apply_env_pairs(parse_env_lines(&contents));
            info!(path = %path.display(), "Loaded environment overrides from local.env");
        }
        Err(err) => {
            warn!(path = %path.display(), ?err, "failed to read local.env overrides");
        }
    }
}

fn apply_env_pairs(pairs: Vec<(String, String)>) {
    for (key, value) in pairs {
        if env::var(&key).is_ok() {
            continue;
        }
        env::set_var(key, value);
    }
}

fn parse_env_lines(contents: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            warn!(line = idx + 1, "invalid local.env entry; skipping");
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        pairs.push((key.to_string(), unescape_value(value.trim())));
    }
    pairs
}

/// Install the global subscriber. `json` switches stderr to one JSON object per line. The
/// returned guard must outlive the program when a log file is configured, otherwise buffered
/// lines are lost.
pub fn init_logging(
    level: &str,
    debug: bool,
    json: bool,
    file: Option<&Path>,
) -> Result<Option<WorkerGuard>> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()))
    };

    let stderr = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(filter())
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(filter())
            .boxed()
    };

    let (file_layer, guard) = match file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .context("log file path has no file name")?;
            stdfs::create_dir_all(directory)
                .with_context(|| format!("creating log directory {}", directory.display()))?;
            let appender = tracing_appender::rolling::never(directory, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr)
        .with(file_layer)
        .try_init()
        .context("installing tracing subscriber")?;

    Ok(guard)
}

pub struct LoadedConfig {
    pub config: GoldpathConfig,
    pub path: PathBuf,
}

/// Resolve the config file: explicit path, then `./config/goldpath.yaml`, then the user config
/// directory. A missing file yields defaults; an unreadable or malformed one is an error.
pub async fn load_config(config_path: Option<&PathBuf>) -> Result<LoadedConfig> {
    let config_path = match config_path {
        Some(path) => path.clone(),
        None => {
            let local_config = PathBuf::from(LOCAL_CONFIG_FILE);
            if local_config.exists() {
                local_config
            } else {
                let mut path = dirs::config_dir().context("Failed to get config directory")?;
                path.push("goldpath");
                path.push("config.yaml");
                path
            }
        }
    };

    if config_path.exists() {
        let content = fs::read_to_string(&config_path)
            .await
            .with_context(|| format!("Failed to read config file {}", config_path.display()))?;

        let config: GoldpathConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", config_path.display()))?;

        info!("Loaded configuration from: {}", config_path.display());
        Ok(LoadedConfig {
            config,
            path: config_path,
        })
    } else {
        info!(
            "Config file not found, using defaults: {}",
            config_path.display()
        );
        Ok(LoadedConfig {
            config: GoldpathConfig::default(),
            path: config_path,
        })
    }
}

fn unescape_value(value: &str) -> String {
    if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
        let inner = &value[1..value.len() - 1];
        inner
            .replace("\\\"", "\"")
            .replace("\\n", "\n")
            .replace("\\r", "\r")
            .replace("\\t", "\t")
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn env_lines_skip_comments_and_unquote() {
        let pairs = parse_env_lines(
            "# local overrides\nGOLDPATH_HEADLESS=0\n\nBROKEN LINE\nGOLDPATH_CHROME=\"/opt/chrome dev/chrome\"\n=orphan\n",
        );
        assert_eq!(
            pairs,
            vec![
                ("GOLDPATH_HEADLESS".to_string(), "0".to_string()),
                (
                    "GOLDPATH_CHROME".to_string(),
                    "/opt/chrome dev/chrome".to_string()
                ),
            ]
        );
    }

    #[test]
    #[serial]
    fn existing_environment_wins_over_local_env() {
        let set = "GOLDPATH_TEST_LOCAL_ENV_SET";
        let unset = "GOLDPATH_TEST_LOCAL_ENV_UNSET";
        env::set_var(set, "from-shell");
        env::remove_var(unset);

        apply_env_pairs(vec![
            (set.to_string(), "from-file".to_string()),
            (unset.to_string(), "from-file".to_string()),
        ]);
        assert_eq!(env::var(set).unwrap(), "from-shell");
        assert_eq!(env::var(unset).unwrap(), "from-file");

        env::remove_var(set);
        env::remove_var(unset);
    }

    #[tokio::test]
    async fn explicit_config_path_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("goldpath.yaml");
        std::fs::write(
            &path,
            "recorder:\n  output_dir: /tmp/goldens\nlogging:\n  level: debug\n",
        )
        .unwrap();

        let loaded = load_config(Some(&path)).await.unwrap();
        assert_eq!(loaded.path, path);
        assert_eq!(loaded.config.recorder.output_dir, PathBuf::from("/tmp/goldens"));
        assert_eq!(loaded.config.logging.level.as_deref(), Some("debug"));
    }

    #[tokio::test]
    async fn missing_explicit_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");
        let loaded = load_config(Some(&path)).await.unwrap();
        assert_eq!(loaded.config.replay.action_timeout_ms, 7_000);
    }

    #[tokio::test]
    async fn malformed_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("goldpath.yaml");
        std::fs::write(&path, "replay: [not, a, map]\n").unwrap();
        assert!(load_config(Some(&path)).await.is_err());
    }
}
