//! Configuration management

use std::{collections::HashMap, env, path::Path, path::PathBuf, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::backend::expand_config_strings;
use crate::connection::{Connection, StaticConnectionDirectory};
use crate::{Error, Result};

/// Prefix of environment variables overriding the config file
pub const ENV_PREFIX: &str = "TOOL_FEDERATION_";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before `${VAR}` expansion.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Built-in filesystem tools
    pub filesystem: FilesystemConfig,
    /// Transport timeouts
    pub transport: TransportTimeouts,
    /// Connections of each bot
    pub bots: HashMap<String, Vec<Connection>>,
}

/// Filesystem tool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesystemConfig {
    /// Offer the filesystem tools at all
    pub enabled: bool,
    /// Directory holding one workspace per bot
    pub root: PathBuf,
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root: PathBuf::from("./workspaces"),
        }
    }
}

/// Timeouts applied to backend traffic
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportTimeouts {
    /// Per JSON-RPC request, unless a connection sets its own
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Whole list/call operation, when the session does not set one
    #[serde(with = "humantime_serde::option")]
    pub call_timeout: Option<Duration>,
}

impl Default for TransportTimeouts {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            call_timeout: None,
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Env files first so their variables are visible to expansion
        config.load_env_files();
        config.expand_env_vars()?;

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = match (path_str.strip_prefix('~'), dirs::home_dir()) {
                (Some(rest), Some(home)) => format!("{}{rest}", home.display()),
                _ => path_str.clone(),
            };

            let path = Path::new(&expanded);
            if !path.exists() {
                tracing::debug!("Env file not found (skipped): {expanded}");
                continue;
            }
            match dotenvy::from_path(path) {
                Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in connection configs
    fn expand_env_vars(&mut self) -> Result<()> {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .map_err(|e| Error::Internal(e.to_string()))?;
        let expand = |value: &str| expand_string(&re, value);

        for connection in self.bots.values_mut().flatten() {
            expand_config_strings(&mut connection.config, &expand);
        }
        Ok(())
    }

    /// Connection directory over the configured bots
    #[must_use]
    pub fn directory(&self) -> StaticConnectionDirectory {
        StaticConnectionDirectory::new(self.bots.clone())
    }
}

/// Expand environment variables in a string
fn expand_string(re: &Regex, value: &str) -> String {
    re.replace_all(value, |caps: &regex::Captures| {
        let default = caps.get(2).map_or("", |m| m.as_str());
        env::var(&caps[1]).unwrap_or_else(|_| default.to_string())
    })
    .into_owned()
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s", "250ms")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse(raw: &str) -> Result<Duration, String> {
        let s = raw.trim();
        let number = |n: &str| {
            n.trim()
                .parse::<u64>()
                .map_err(|e| format!("invalid duration '{raw}': {e}"))
        };

        // "ms" before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            number(ms).map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            number(secs).map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            number(mins).map(|m| Duration::from_secs(m * 60))
        } else {
            number(s).map(Duration::from_secs)
        }
    }

    /// Same format for `Option<Duration>`; absent or null means `None`
    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        /// Serialize an optional duration
        ///
        /// # Errors
        ///
        /// Returns a serialization error if the serializer fails.
        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        /// Deserialize an optional duration
        ///
        /// # Errors
        ///
        /// Returns a deserialization error if a present value is not a duration.
        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|s| super::parse(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionDirectory;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_load_env_files_sets_env_vars() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join("test.env");
        let mut f = std::fs::File::create(&env_path).unwrap();
        writeln!(f, "TOOL_FED_TEST_KEY_A=hello_from_env_file").unwrap();
        writeln!(f, "TOOL_FED_TEST_KEY_B=42").unwrap();
        drop(f);

        let config = Config {
            env_files: vec![env_path.to_string_lossy().to_string()],
            ..Default::default()
        };
        config.load_env_files();

        assert_eq!(env::var("TOOL_FED_TEST_KEY_A").unwrap(), "hello_from_env_file");
        assert_eq!(env::var("TOOL_FED_TEST_KEY_B").unwrap(), "42");
    }

    #[test]
    fn test_load_env_files_skips_missing() {
        let config = Config {
            env_files: vec!["/nonexistent/path/.env".to_string()],
            ..Default::default()
        };
        config.load_env_files();
    }

    #[test]
    fn test_bots_deserialized_from_yaml() {
        let yaml = r#"
filesystem:
  root: /var/lib/bots
transport:
  request_timeout: 10s
  call_timeout: 250ms
bots:
  bot-1:
    - id: c1
      name: Remote SSE
      type: sse
      config:
        url: http://localhost:9000/sse
    - id: c2
      name: Old
      type: http
      active: false
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.filesystem.enabled);
        assert_eq!(config.filesystem.root, PathBuf::from("/var/lib/bots"));
        assert_eq!(config.transport.request_timeout, Duration::from_secs(10));
        assert_eq!(config.transport.call_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.bots["bot-1"].len(), 2);
        assert!(!config.bots["bot-1"][1].active);
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.filesystem.enabled);
        assert_eq!(config.transport.request_timeout, Duration::from_secs(30));
        assert_eq!(config.transport.call_timeout, None);
        assert!(config.bots.is_empty());
    }

    #[test]
    fn test_duration_formats() {
        assert_eq!(humantime_serde::parse("100ms"), Ok(Duration::from_millis(100)));
        assert_eq!(humantime_serde::parse("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(humantime_serde::parse("5m"), Ok(Duration::from_secs(300)));
        assert_eq!(humantime_serde::parse("7"), Ok(Duration::from_secs(7)));
        assert!(humantime_serde::parse("soon").is_err());
    }

    #[test]
    fn test_expand_string_uses_default_when_unset() {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").unwrap();
        assert_eq!(
            expand_string(&re, "Bearer ${TOOL_FED_TEST_UNSET_TOKEN:-anonymous}"),
            "Bearer anonymous"
        );
        assert_eq!(expand_string(&re, "plain"), "plain");
    }

    #[test]
    fn test_load_expands_connection_config() {
        // GIVEN: an env file and a config file referencing its variable
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join("secrets.env");
        std::fs::write(&env_path, "TOOL_FED_TEST_API_TOKEN=s3cret\n").unwrap();
        let config_path = dir.path().join("config.yaml");
        std::fs::write(
            &config_path,
            format!(
                r#"
env_files:
  - {}
bots:
  bot-1:
    - id: c1
      name: Api
      type: http
      config:
        url: http://localhost/mcp
        headers:
          Authorization: "Bearer ${{TOOL_FED_TEST_API_TOKEN}}"
"#,
                env_path.display()
            ),
        )
        .unwrap();

        // WHEN: the config is loaded
        let config = Config::load(Some(&config_path)).unwrap();

        // THEN: the header carries the expanded value
        let headers = &config.bots["bot-1"][0].config["headers"];
        assert_eq!(headers["Authorization"], "Bearer s3cret");
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let err = Config::load(Some(Path::new("/nonexistent/config.yaml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_directory_serves_active_connections() {
        let yaml = r"
bots:
  bot-1:
    - { id: c1, name: A, type: http }
    - { id: c2, name: B, type: stdio, active: false }
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let directory = config.directory();

        let active = directory.list_active_by_bot("bot-1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "c1");
        assert!(directory.list_active_by_bot("bot-2").await.unwrap().is_empty());
    }
}
