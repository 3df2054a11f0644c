use serde::Deserialize;

/// Config file read from the working directory at startup.
pub const CONFIG_FILE: &str = "codeshare.toml";

/// Top-level server configuration, loaded from `codeshare.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub web_root: String,
    pub log_format: LogFormat,
    pub limits: LimitsConfig,
    pub rooms: RoomsConfig,
    pub cors: CorsConfig,
    /// Exercises to seed the catalog with. Empty means the built-in set.
    pub exercises: Vec<ExerciseSeed>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5000".to_string(),
            web_root: "web".to_string(),
            log_format: LogFormat::Pretty,
            limits: LimitsConfig::default(),
            rooms: RoomsConfig::default(),
            cors: CorsConfig::default(),
            exercises: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Infrastructure limits (connection caps, buffer sizes, rate limits).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_ws_connections: usize,
    /// Sustained events per second accepted from one connection.
    pub ws_rate_limit_per_sec: f64,
    /// Outbound queue depth per connection. A full queue drops events for
    /// that connection only.
    pub connection_message_buffer: usize,
    pub max_code_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_ws_connections: 500,
            ws_rate_limit_per_sec: 30.0,
            connection_message_buffer: 256,
            max_code_bytes: 256 * 1024,
        }
    }
}

/// Room behaviour.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoomsConfig {
    /// Save every accepted code-update as the exercise's current code.
    pub persist_snapshots: bool,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            persist_snapshots: true,
        }
    }
}

/// Cross-origin policy for the HTTP API.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Exact origins allowed. `"*"` allows any origin.
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

/// One `[[exercises]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ExerciseSeed {
    /// Stable id, used as the room key. Derived from the name when omitted.
    pub id: Option<String>,
    pub name: String,
    pub initial_code: String,
    pub solution: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

impl ServerConfig {
    /// Validate configuration. Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(invalid(
                "listen_addr",
                format!("{:?} is not a valid socket address", self.listen_addr),
            ));
        }
        if self.limits.max_ws_connections == 0 {
            return Err(invalid("limits.max_ws_connections", "must be > 0"));
        }
        if self.limits.ws_rate_limit_per_sec <= 0.0 {
            return Err(invalid("limits.ws_rate_limit_per_sec", "must be > 0"));
        }
        if self.limits.connection_message_buffer == 0 {
            return Err(invalid("limits.connection_message_buffer", "must be > 0"));
        }
        if self.limits.max_code_bytes == 0 {
            return Err(invalid("limits.max_code_bytes", "must be > 0"));
        }
        if self.limits.max_code_bytes > codeshare_core::net::protocol::MAX_MESSAGE_SIZE {
            return Err(invalid(
                "limits.max_code_bytes",
                "must not exceed the protocol frame limit",
            ));
        }
        for seed in &self.exercises {
            if seed.name.trim().is_empty() {
                return Err(invalid("exercises.name", "must not be empty"));
            }
        }

        if self.cors.allowed_origins.iter().any(|o| o == "*") {
            tracing::warn!("cors.allowed_origins contains \"*\"; any origin may call the API");
        }
        Ok(())
    }

    /// Load config from `codeshare.toml` if it exists, then apply env var overrides.
    pub fn load() -> Self {
        let mut config = match std::fs::read_to_string(CONFIG_FILE) {
            Ok(content) => match toml::from_str::<ServerConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!("Loaded configuration from {CONFIG_FILE}");
                    cfg
                },
                Err(e) => {
                    tracing::warn!("Failed to parse {CONFIG_FILE}: {e}, using defaults");
                    ServerConfig::default()
                },
            },
            Err(_) => {
                tracing::info!("No {CONFIG_FILE} found, using defaults");
                ServerConfig::default()
            },
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Apply `CODESHARE_*` overrides. `lookup` is injected so tests don't
    /// touch the process environment.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = lookup("CODESHARE_LISTEN_ADDR")
            && !addr.is_empty()
        {
            self.listen_addr = addr;
        }
        if let Some(root) = lookup("CODESHARE_WEB_ROOT")
            && !root.is_empty()
        {
            self.web_root = root;
        }
        if let Some(origins) = lookup("CODESHARE_ALLOWED_ORIGINS")
            && !origins.is_empty()
        {
            self.cors.allowed_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
        if let Some(val) = lookup("CODESHARE_MAX_WS_CONNECTIONS")
            && let Ok(n) = val.parse::<usize>()
        {
            self.limits.max_ws_connections = n;
        }
        if let Some(val) = lookup("CODESHARE_WS_RATE_LIMIT")
            && let Ok(n) = val.parse::<f64>()
        {
            self.limits.ws_rate_limit_per_sec = n;
        }
        if let Some(val) = lookup("CODESHARE_PERSIST_SNAPSHOTS")
            && let Ok(b) = val.parse::<bool>()
        {
            self.rooms.persist_snapshots = b;
        }
        if let Some(val) = lookup("CODESHARE_LOG_FORMAT") {
            match val.as_str() {
                "json" => self.log_format = LogFormat::Json,
                "pretty" => self.log_format = LogFormat::Pretty,
                other => tracing::warn!(value = other, "Unknown CODESHARE_LOG_FORMAT, ignoring"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.listen_addr, "0.0.0.0:5000");
        assert_eq!(cfg.web_root, "web");
        assert_eq!(cfg.log_format, LogFormat::Pretty);
        assert!(cfg.rooms.persist_snapshots);
        assert!(cfg.exercises.is_empty());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn parse_full_toml() {
        let toml_str = r#"
listen_addr = "127.0.0.1:9090"
web_root = "/srv/frontend"
log_format = "json"

[limits]
max_ws_connections = 50
ws_rate_limit_per_sec = 10.0
connection_message_buffer = 64
max_code_bytes = 4096

[rooms]
persist_snapshots = false

[cors]
allowed_origins = ["https://example.org"]

[[exercises]]
id = "loops"
name = "Loops"
initial_code = "for (;;) {}"
solution = "for (let i = 0; i < 3; i++) {}"
"#;
        let cfg: ServerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.listen_addr, "127.0.0.1:9090");
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert_eq!(cfg.limits.max_ws_connections, 50);
        assert_eq!(cfg.limits.connection_message_buffer, 64);
        assert_eq!(cfg.limits.max_code_bytes, 4096);
        assert!(!cfg.rooms.persist_snapshots);
        assert_eq!(cfg.cors.allowed_origins, vec!["https://example.org"]);
        assert_eq!(cfg.exercises.len(), 1);
        assert_eq!(cfg.exercises[0].id.as_deref(), Some("loops"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn missing_sections_use_defaults() {
        let cfg: ServerConfig = toml::from_str("listen_addr = \"0.0.0.0:8080\"").unwrap();
        assert_eq!(cfg.limits.max_ws_connections, 500);
        assert_eq!(cfg.limits.connection_message_buffer, 256);
        assert!(cfg.rooms.persist_snapshots);
    }

    #[test]
    fn validate_rejects_invalid_addr() {
        let cfg = ServerConfig {
            listen_addr: "not-an-address".to_string(),
            ..ServerConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().starts_with("listen_addr"));
    }

    #[test]
    fn validate_rejects_zero_limits() {
        let mut cfg = ServerConfig::default();
        cfg.limits.connection_message_buffer = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = ServerConfig::default();
        cfg.limits.ws_rate_limit_per_sec = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("CODESHARE_LISTEN_ADDR", "127.0.0.1:7000"),
            ("CODESHARE_ALLOWED_ORIGINS", "https://a.dev, https://b.dev,"),
            ("CODESHARE_PERSIST_SNAPSHOTS", "false"),
            ("CODESHARE_WS_RATE_LIMIT", "not-a-number"),
            ("CODESHARE_LOG_FORMAT", "json"),
        ]);
        let mut cfg = ServerConfig::default();
        cfg.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.listen_addr, "127.0.0.1:7000");
        assert_eq!(cfg.cors.allowed_origins, vec!["https://a.dev", "https://b.dev"]);
        assert!(!cfg.rooms.persist_snapshots);
        assert_eq!(cfg.log_format, LogFormat::Json);
        // Unparseable values leave the default in place
        assert!((cfg.limits.ws_rate_limit_per_sec - 30.0).abs() < f64::EPSILON);
    }
}
