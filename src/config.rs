use std::path::PathBuf;

const ENV_WORKSPACE: &str = "ATTENDANCED_WORKSPACE";
const ENV_LOG: &str = "ATTENDANCED_LOG";
const ENV_LOG_FORMAT: &str = "ATTENDANCED_LOG_FORMAT";
const DEFAULT_LOG_FILTER: &str = "attendanced=info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

/// Process-level settings. Academic settings live in the workspace itself.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub workspace: Option<PathBuf>,
    pub log_filter: String,
    pub log_format: LogFormat,
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let workspace = lookup(ENV_WORKSPACE)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);
        let log_filter = lookup(ENV_LOG)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
        let log_format = match lookup(ENV_LOG_FORMAT)
            .map(|s| s.trim().to_ascii_lowercase())
            .as_deref()
        {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        };
        DaemonConfig {
            workspace,
            log_filter,
            log_format,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> DaemonConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        DaemonConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let cfg = config_from(&[]);
        assert!(cfg.workspace.is_none());
        assert_eq!(cfg.log_filter, DEFAULT_LOG_FILTER);
        assert_eq!(cfg.log_format, LogFormat::Compact);
    }

    #[test]
    fn reads_workspace_filter_and_json_format() {
        let cfg = config_from(&[
            (ENV_WORKSPACE, "/tmp/uni"),
            (ENV_LOG, "attendanced=debug"),
            (ENV_LOG_FORMAT, "JSON"),
        ]);
        assert_eq!(cfg.workspace, Some(PathBuf::from("/tmp/uni")));
        assert_eq!(cfg.log_filter, "attendanced=debug");
        assert_eq!(cfg.log_format, LogFormat::Json);
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let cfg = config_from(&[(ENV_WORKSPACE, "  "), (ENV_LOG, "")]);
        assert!(cfg.workspace.is_none());
        assert_eq!(cfg.log_filter, DEFAULT_LOG_FILTER);
    }
}
