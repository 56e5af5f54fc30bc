//! Interpretation of a connection's opaque config blob

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::config::humantime_serde;
use crate::connection::{Connection, ConnectionType};
use crate::transport::{HttpMode, StdioCommand};
use crate::{Error, Result};

/// Fields understood for `http` and `sse` connections
#[derive(Debug, Deserialize)]
struct HttpSettings {
    #[serde(alias = "http_url")]
    url: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default, with = "humantime_serde::option")]
    timeout: Option<Duration>,
}

/// Fields understood for `stdio` connections
#[derive(Debug, Deserialize)]
struct StdioSettings {
    command: String,
    #[serde(default)]
    args: Option<Vec<String>>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default, with = "humantime_serde::option")]
    timeout: Option<Duration>,
}

/// Fully resolved transport settings of one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSpec {
    /// HTTP-based (streamable or SSE)
    Http {
        /// Endpoint URL
        url: String,
        /// Extra request headers
        headers: HashMap<String, String>,
        /// Request mode
        mode: HttpMode,
        /// Per-request timeout
        timeout: Duration,
    },
    /// Subprocess
    Stdio {
        /// Command line
        command: StdioCommand,
        /// Per-request timeout
        timeout: Duration,
    },
}

impl TransportSpec {
    /// Resolve the settings of `connection`.
    ///
    /// `workspace` is the bot's sandbox directory; stdio processes run there
    /// unless their config names a `cwd` inside it.
    pub fn from_connection(
        connection: &Connection,
        kind: ConnectionType,
        workspace: Option<&Path>,
        default_timeout: Duration,
    ) -> Result<Self> {
        let blob = Value::Object(connection.config.clone());
        let invalid = |e: serde_json::Error| {
            Error::Config(format!("Invalid config for connection '{}': {e}", connection.name))
        };

        match kind {
            ConnectionType::Http | ConnectionType::Sse => {
                let settings: HttpSettings = serde_json::from_value(blob).map_err(invalid)?;
                Ok(Self::Http {
                    url: settings.url,
                    headers: settings.headers,
                    mode: if kind == ConnectionType::Sse {
                        HttpMode::Sse
                    } else {
                        HttpMode::Streamable
                    },
                    timeout: settings.timeout.unwrap_or(default_timeout),
                })
            }
            ConnectionType::Stdio => {
                let settings: StdioSettings = serde_json::from_value(blob).map_err(invalid)?;
                let (program, args) = split_command(&settings.command, settings.args)?;
                Ok(Self::Stdio {
                    command: StdioCommand {
                        program,
                        args,
                        env: settings.env,
                        cwd: sandbox_cwd(workspace, settings.cwd.as_deref())?,
                    },
                    timeout: settings.timeout.unwrap_or(default_timeout),
                })
            }
        }
    }
}

/// Program and arguments; a lone command string is split shell-style
fn split_command(command: &str, args: Option<Vec<String>>) -> Result<(String, Vec<String>)> {
    if let Some(args) = args {
        return Ok((command.trim().to_string(), args));
    }
    let mut parts = shlex::split(command)
        .ok_or_else(|| Error::Config(format!("Unbalanced quoting in command: {command}")))?
        .into_iter();
    let program = parts
        .next()
        .ok_or_else(|| Error::Config("Empty command".to_string()))?;
    Ok((program, parts.collect()))
}

/// Working directory of a stdio process, confined to the bot workspace
fn sandbox_cwd(workspace: Option<&Path>, requested: Option<&str>) -> Result<Option<PathBuf>> {
    match (workspace, requested) {
        (Some(root), Some(dir)) => {
            let relative = super::filesystem::sanitize_relative_path(dir)
                .ok_or_else(|| Error::Config(format!("cwd '{dir}' escapes the bot workspace")))?;
            Ok(Some(root.join(relative)))
        }
        (Some(root), None) => Ok(Some(root.to_path_buf())),
        (None, requested) => Ok(requested.map(PathBuf::from)),
    }
}

/// Stable fingerprint of a connection's type and config
#[must_use]
pub fn fingerprint(connection: &Connection) -> String {
    let mut hasher = Sha256::new();
    hasher.update(connection.connection_type.as_bytes());
    hasher.update([0u8]);
    hasher.update(Value::Object(connection.config.clone()).to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Expand `${VAR}` patterns in every string of a config blob
pub fn expand_config_strings(config: &mut Map<String, Value>, expand: &impl Fn(&str) -> String) {
    for value in config.values_mut() {
        expand_value(value, expand);
    }
}

fn expand_value(value: &mut Value, expand: &impl Fn(&str) -> String) {
    match value {
        Value::String(s) => *s = expand(s),
        Value::Array(items) => items.iter_mut().for_each(|v| expand_value(v, expand)),
        Value::Object(map) => expand_config_strings(map, expand),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TIMEOUT: Duration = Duration::from_secs(30);

    #[test]
    fn sse_connection_resolves_to_sse_mode() {
        let conn = Connection::new("c1", "Remote SSE", "sse").with_config(json!({
            "url": "http://localhost:9000/sse",
            "headers": { "Authorization": "Bearer x" },
            "timeout": "5s"
        }));
        let spec = TransportSpec::from_connection(&conn, ConnectionType::Sse, None, TIMEOUT).unwrap();
        let TransportSpec::Http { url, headers, mode, timeout } = spec else {
            panic!("expected http spec");
        };
        assert_eq!(url, "http://localhost:9000/sse");
        assert_eq!(headers["Authorization"], "Bearer x");
        assert_eq!(mode, HttpMode::Sse);
        assert_eq!(timeout, Duration::from_secs(5));
    }

    #[test]
    fn http_connection_accepts_http_url_alias() {
        let conn = Connection::new("c1", "Api", "http").with_config(json!({ "http_url": "http://x/mcp" }));
        let spec = TransportSpec::from_connection(&conn, ConnectionType::Http, None, TIMEOUT).unwrap();
        assert!(matches!(spec, TransportSpec::Http { mode: HttpMode::Streamable, timeout, .. } if timeout == TIMEOUT));
    }

    #[test]
    fn missing_url_is_config_error() {
        let conn = Connection::new("c1", "Api", "http");
        let err = TransportSpec::from_connection(&conn, ConnectionType::Http, None, TIMEOUT).unwrap_err();
        assert!(err.to_string().contains("Api"));
    }

    #[test]
    fn stdio_command_string_is_split_and_confined() {
        // GIVEN: a stdio connection with a single command string
        let conn = Connection::new("c3", "Local", "stdio").with_config(json!({
            "command": "npx -y \"@scope/server tools\"",
            "cwd": "servers/local"
        }));

        // WHEN: resolving inside a workspace
        let spec =
            TransportSpec::from_connection(&conn, ConnectionType::Stdio, Some(Path::new("/data/bot-1")), TIMEOUT)
                .unwrap();

        // THEN: program/args split, cwd inside the workspace
        let TransportSpec::Stdio { command, .. } = spec else {
            panic!("expected stdio spec");
        };
        assert_eq!(command.program, "npx");
        assert_eq!(command.args, vec!["-y", "@scope/server tools"]);
        assert_eq!(command.cwd, Some(PathBuf::from("/data/bot-1/servers/local")));
    }

    #[test]
    fn stdio_cwd_cannot_escape_workspace() {
        let conn = Connection::new("c3", "Local", "stdio").with_config(json!({ "command": "srv", "cwd": "../other" }));
        let result = TransportSpec::from_connection(&conn, ConnectionType::Stdio, Some(Path::new("/data/bot-1")), TIMEOUT);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn explicit_args_keep_command_verbatim() {
        let (program, args) = split_command("my server", Some(vec!["--flag".into()])).unwrap();
        assert_eq!(program, "my server");
        assert_eq!(args, vec!["--flag"]);
    }

    #[test]
    fn fingerprint_changes_with_config() {
        let a = Connection::new("c1", "A", "http").with_config(json!({ "url": "http://a" }));
        let b = Connection::new("c1", "A", "http").with_config(json!({ "url": "http://b" }));
        assert_eq!(fingerprint(&a), fingerprint(&a.clone()));
        assert_ne!(fingerprint(&a), fingerprint(&b));
        assert_eq!(fingerprint(&a).len(), 64);
    }

    #[test]
    fn expand_reaches_nested_strings() {
        let mut config = json!({ "headers": { "Authorization": "Bearer ${TOKEN}" }, "args": ["${TOKEN}"], "n": 1 })
            .as_object()
            .cloned()
            .unwrap();
        expand_config_strings(&mut config, &|s: &str| s.replace("${TOKEN}", "abc"));
        assert_eq!(config["headers"]["Authorization"], "Bearer abc");
        assert_eq!(config["args"][0], "abc");
        assert_eq!(config["n"], 1);
    }
}
