//! Exchange configuration
//!
//! Everything a deployment wires in (backend choice, model, tool manifest,
//! system instruction, timeouts, endpoint and credentials) comes from the
//! environment, with an optional JSON file for the tool manifest.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_SESSION_MODEL: &str = "gpt-4.1";
const DEFAULT_STATELESS_MODEL: &str = "openai/gpt-oss-20b";
const DEFAULT_CLI_PATH: &str = "copilot";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_LOCAL_HOST: &str = "localhost";
const DEFAULT_LOCAL_PORT: u16 = 1234;
/// Per-call timeout for the built-in radare2 tool server, in milliseconds
const DEFAULT_TOOL_TIMEOUT_MS: u64 = 100_000;

const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert reverse engineer using radare2 via r2mcp.
Plan first, then execute minimal tool calls.";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} is required for the {backend} backend")]
    Missing { var: &'static str, backend: &'static str },

    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to read tool manifest {}: {source}", path.display())]
    ManifestRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse tool manifest {}: {source}", path.display())]
    ManifestParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid tool manifest: {0}")]
    InvalidManifest(String),
}

/// Top-level configuration: one backend per deployment
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    pub backend: BackendConfig,
    /// Wall-clock bound on one exchange. Session teardown runs after it,
    /// under its own per-call bound.
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub enum BackendConfig {
    SessionOriented(SessionSettings),
    Stateless(StatelessSettings),
}

impl BackendConfig {
    pub fn name(&self) -> &'static str {
        match self {
            BackendConfig::SessionOriented(_) => "session-oriented",
            BackendConfig::Stateless(_) => "stateless",
        }
    }

    pub fn model(&self) -> &str {
        match self {
            BackendConfig::SessionOriented(s) => &s.session.model,
            BackendConfig::Stateless(s) => &s.model,
        }
    }
}

/// How the agent runtime process is launched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeOptions {
    pub cli_path: PathBuf,
    pub log_level: String,
    /// Start lazily on first session creation if `start` was not called
    pub auto_start: bool,
    /// Relaunch a runtime found exited before a request. Off by default:
    /// the relaunched process does not know the exchange's session.
    pub auto_restart: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            cli_path: PathBuf::from(DEFAULT_CLI_PATH),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            auto_start: true,
            auto_restart: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub runtime: RuntimeOptions,
    pub session: SessionConfig,
}

/// Session parameters, serialized as the `session.create` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub model: String,
    pub mcp_servers: BTreeMap<String, ToolServer>,
    pub streaming: bool,
    pub infinite_sessions: InfiniteSessions,
    pub system_message: SystemMessage,
}

impl SessionConfig {
    pub fn new(
        model: impl Into<String>,
        mcp_servers: BTreeMap<String, ToolServer>,
        system_instruction: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            mcp_servers,
            streaming: false,
            infinite_sessions: InfiniteSessions { enabled: false },
            system_message: SystemMessage {
                mode: SystemMessageMode::Replace,
                content: system_instruction.into(),
            },
        }
    }

    /// Reject sessions the runtime could not honor
    pub fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err("model id is empty".to_string());
        }
        if self.streaming {
            return Err("streaming sessions are not supported".to_string());
        }
        for (name, server) in &self.mcp_servers {
            if name.trim().is_empty() {
                return Err("tool server with an empty name".to_string());
            }
            server.validate().map_err(|e| format!("tool server {name}: {e}"))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfiniteSessions {
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemMessage {
    pub mode: SystemMessageMode,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemMessageMode {
    /// Fully override the runtime's default instruction
    Replace,
    Append,
}

/// One entry of the tool manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolServer {
    #[serde(rename = "type", default)]
    pub kind: ToolServerKind,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "all_tools")]
    pub tools: Vec<String>,
    /// Per-call timeout in milliseconds, independent of the exchange timeout
    pub timeout: u64,
}

fn all_tools() -> Vec<String> {
    vec!["*".to_string()]
}

impl ToolServer {
    pub fn local(command: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            kind: ToolServerKind::Local,
            command: command.into(),
            args,
            tools: all_tools(),
            timeout: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.command.trim().is_empty() {
            return Err("command is empty".to_string());
        }
        if self.timeout == 0 {
            return Err("timeout must be positive".to_string());
        }
        if self.tools.is_empty() {
            return Err("no tools permitted".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolServerKind {
    #[default]
    Local,
    Stdio,
}

/// Local inference endpoint settings
#[derive(Debug, Clone)]
pub struct StatelessSettings {
    pub host: String,
    pub port: u16,
    pub token: String,
    pub model: String,
    pub reasoning: ReasoningEffort,
}

impl StatelessSettings {
    pub fn endpoint_url(&self) -> String {
        format!("http://{}:{}/api/v1/chat", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    #[default]
    Low,
    Medium,
    High,
}

impl std::str::FromStr for ReasoningEffort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err("expected low, medium or high".to_string()),
        }
    }
}

impl ExchangeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from any variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let timeout = match var("R2COPILOT_TIMEOUT_SECS") {
            Some(raw) => parse_timeout(&raw)?,
            None => DEFAULT_TIMEOUT,
        };

        let backend = match var("R2COPILOT_BACKEND").as_deref().map(str::trim) {
            None | Some("session") => BackendConfig::SessionOriented(session_settings(&var)?),
            Some("stateless") => BackendConfig::Stateless(stateless_settings(&var)?),
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "R2COPILOT_BACKEND",
                    value: other.to_string(),
                    reason: "expected session or stateless".to_string(),
                })
            }
        };

        Ok(Self { backend, timeout })
    }
}

fn parse_timeout(raw: &str) -> Result<Duration, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::Invalid {
            var: "R2COPILOT_TIMEOUT_SECS",
            value: raw.to_string(),
            reason: "expected a positive number of seconds".to_string(),
        }),
    }
}

fn session_settings(var: &impl Fn(&str) -> Option<String>) -> Result<SessionSettings, ConfigError> {
    let mcp_servers = match var("R2COPILOT_MCP_CONFIG") {
        Some(path) => load_manifest(Path::new(&path))?,
        None => default_manifest(var("R2MCP_DIR").unwrap_or_else(|| ".".to_string())),
    };

    let model = var("R2COPILOT_MODEL").unwrap_or_else(|| DEFAULT_SESSION_MODEL.to_string());
    let system = var("R2COPILOT_SYSTEM_PROMPT").unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

    let mut runtime = RuntimeOptions::default();
    if let Some(path) = var("R2COPILOT_CLI_PATH") {
        runtime.cli_path = PathBuf::from(path);
    }
    if let Some(level) = var("R2COPILOT_LOG_LEVEL") {
        runtime.log_level = level;
    }

    let session = SessionConfig::new(model, mcp_servers, system);
    session.validate().map_err(ConfigError::InvalidManifest)?;

    Ok(SessionSettings { runtime, session })
}

fn stateless_settings(
    var: &impl Fn(&str) -> Option<String>,
) -> Result<StatelessSettings, ConfigError> {
    let token = var("R2COPILOT_LOCAL_TOKEN").ok_or(ConfigError::Missing {
        var: "R2COPILOT_LOCAL_TOKEN",
        backend: "stateless",
    })?;

    let port = match var("R2COPILOT_LOCAL_PORT") {
        Some(raw) => raw.trim().parse::<u16>().map_err(|e| ConfigError::Invalid {
            var: "R2COPILOT_LOCAL_PORT",
            value: raw.clone(),
            reason: e.to_string(),
        })?,
        None => DEFAULT_LOCAL_PORT,
    };

    let reasoning = match var("R2COPILOT_REASONING") {
        Some(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
            var: "R2COPILOT_REASONING",
            value: raw.clone(),
            reason,
        })?,
        None => ReasoningEffort::default(),
    };

    Ok(StatelessSettings {
        host: var("R2COPILOT_LOCAL_HOST").unwrap_or_else(|| DEFAULT_LOCAL_HOST.to_string()),
        port,
        token,
        model: var("R2COPILOT_MODEL").unwrap_or_else(|| DEFAULT_STATELESS_MODEL.to_string()),
        reasoning,
    })
}

/// Built-in manifest: a single radare2 MCP server run through `uv`
pub fn default_manifest(r2mcp_dir: impl Into<String>) -> BTreeMap<String, ToolServer> {
    let server = ToolServer::local(
        "uv",
        vec![
            "--directory".to_string(),
            r2mcp_dir.into(),
            "run".to_string(),
            "r2mcp.py".to_string(),
        ],
        Duration::from_millis(DEFAULT_TOOL_TIMEOUT_MS),
    );
    BTreeMap::from([("radare2".to_string(), server)])
}

/// Load a tool manifest: a JSON object mapping server names to entries
pub fn load_manifest(path: &Path) -> Result<BTreeMap<String, ToolServer>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ManifestRead {
        path: path.to_path_buf(),
        source,
    })?;
    let servers: BTreeMap<String, ToolServer> =
        serde_json::from_str(&raw).map_err(|source| ConfigError::ManifestParse {
            path: path.to_path_buf(),
            source,
        })?;

    for (name, server) in &servers {
        server
            .validate()
            .map_err(|e| ConfigError::InvalidManifest(format!("{name}: {e}")))?;
    }
    Ok(servers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_to_session_backend() {
        let config = ExchangeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(120));
        let BackendConfig::SessionOriented(settings) = config.backend else {
            panic!("expected session-oriented backend");
        };
        assert_eq!(settings.session.model, "gpt-4.1");
        assert!(!settings.session.streaming);
        assert!(!settings.session.infinite_sessions.enabled);
        assert_eq!(settings.session.system_message.mode, SystemMessageMode::Replace);
        assert!(settings.runtime.auto_start);
        assert!(!settings.runtime.auto_restart);
        assert_eq!(settings.session.mcp_servers["radare2"].timeout, 100_000);
    }

    #[test]
    fn test_session_payload_wire_format() {
        let config = SessionConfig::new("gpt-4.1", default_manifest("/opt/r2mcp"), "be terse");
        let wire = serde_json::to_value(&config).unwrap();
        assert_eq!(wire["streaming"], false);
        assert_eq!(wire["infiniteSessions"]["enabled"], false);
        assert_eq!(wire["systemMessage"]["mode"], "replace");
        assert_eq!(wire["systemMessage"]["content"], "be terse");
        let radare = &wire["mcpServers"]["radare2"];
        assert_eq!(radare["type"], "local");
        assert_eq!(radare["command"], "uv");
        assert_eq!(radare["tools"][0], "*");
        assert_eq!(radare["args"][1], "/opt/r2mcp");
    }

    #[test]
    fn test_stateless_requires_token() {
        let err = ExchangeConfig::from_lookup(lookup(&[("R2COPILOT_BACKEND", "stateless")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Missing { var: "R2COPILOT_LOCAL_TOKEN", .. }));
    }

    #[test]
    fn test_stateless_settings() {
        let config = ExchangeConfig::from_lookup(lookup(&[
            ("R2COPILOT_BACKEND", "stateless"),
            ("R2COPILOT_LOCAL_TOKEN", "secret"),
            ("R2COPILOT_LOCAL_HOST", "10.0.0.2"),
            ("R2COPILOT_REASONING", "High"),
            ("R2COPILOT_TIMEOUT_SECS", "30"),
        ]))
        .unwrap();
        assert_eq!(config.timeout, Duration::from_secs(30));
        let BackendConfig::Stateless(settings) = config.backend else {
            panic!("expected stateless backend");
        };
        assert_eq!(settings.endpoint_url(), "http://10.0.0.2:1234/api/v1/chat");
        assert_eq!(settings.reasoning, ReasoningEffort::High);
        assert_eq!(settings.model, "openai/gpt-oss-20b");
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(ExchangeConfig::from_lookup(lookup(&[("R2COPILOT_TIMEOUT_SECS", "0")])).is_err());
        assert!(ExchangeConfig::from_lookup(lookup(&[("R2COPILOT_BACKEND", "cloud")])).is_err());
        assert!(ExchangeConfig::from_lookup(lookup(&[
            ("R2COPILOT_BACKEND", "stateless"),
            ("R2COPILOT_LOCAL_TOKEN", "t"),
            ("R2COPILOT_LOCAL_PORT", "99999"),
        ]))
        .is_err());
    }

    #[test]
    fn test_load_manifest_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"ghidra": {{"type": "local", "command": "ghidra-mcp", "args": ["--stdio"], "timeout": 5000}}}}"#
        )
        .unwrap();

        let servers = load_manifest(file.path()).unwrap();
        let ghidra = &servers["ghidra"];
        assert_eq!(ghidra.command, "ghidra-mcp");
        assert_eq!(ghidra.tools, vec!["*".to_string()]);
        assert_eq!(ghidra.timeout, 5000);
    }

    #[test]
    fn test_load_manifest_rejects_empty_command() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"broken": {{"command": " ", "timeout": 10}}}}"#).unwrap();
        assert!(matches!(
            load_manifest(file.path()),
            Err(ConfigError::InvalidManifest(_))
        ));
    }

    #[test]
    fn test_load_manifest_rejects_unparseable_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            load_manifest(file.path()),
            Err(ConfigError::ManifestParse { .. })
        ));
    }
}
