//! Configuration data structures for the preview server.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files. Every
//! section has defaults so an empty file is a valid configuration.
use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

use crate::core::interception::{DEFAULT_INTERCEPTION_TIMEOUT, InterceptionTimeout};

fn default_preview_extensions() -> Vec<String> {
    vec!["htm".to_string(), "html".to_string()]
}

/// Request interception settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct InterceptionConfig {
    /// Milliseconds a filtered request waits for a subscriber.
    /// `0` disables the timeout, negative values mean the default.
    pub timeout_ms: i64,
}

impl InterceptionConfig {
    pub fn timeout(&self) -> InterceptionTimeout {
        InterceptionTimeout::from_millis(self.timeout_ms)
    }
}

impl Default for InterceptionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_INTERCEPTION_TIMEOUT.as_millis() as i64,
        }
    }
}

/// Static server behaviour
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerSection {
    /// Upper bound on draining in-flight requests when a server closes
    pub drain_timeout_ms: u64,
    /// Serve `index.html` for directory requests
    pub append_index_html: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            drain_timeout_ms: 5000,
            append_index_html: true,
        }
    }
}

/// The project being previewed
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ProjectConfig {
    /// Project root folder; previews are only offered inside it
    pub root: Option<String>,
    /// Extensions (without the dot) that can be previewed, matched case-insensitively
    pub preview_extensions: Vec<String>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            root: None,
            preview_extensions: default_preview_extensions(),
        }
    }
}

/// Control API exposed by the binary
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ControlConfig {
    /// Address of the HTTP control API; disabled when unset
    pub listen_addr: Option<String>,
    /// Capacity of the command channel
    pub command_buffer: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            listen_addr: None,
            command_buffer: 64,
        }
    }
}

/// Logging output
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub level: String,
    /// Emit JSON lines instead of pretty console output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PreviewConfig {
    /// Loopback IP every static server binds to
    pub bind_address: String,
    /// Folders served from startup
    pub roots: Vec<String>,
    pub interception: InterceptionConfig,
    pub server: ServerSection,
    pub project: ProjectConfig,
    pub control: ControlConfig,
    pub logging: LoggingConfig,
}

impl PreviewConfig {
    /// Create a new preview configuration builder
    pub fn builder() -> PreviewConfigBuilder {
        PreviewConfigBuilder::default()
    }

    /// Continue building from an already loaded configuration
    pub fn into_builder(self) -> PreviewConfigBuilder {
        PreviewConfigBuilder { config: self }
    }

    /// Parsed bind address; falls back to 127.0.0.1 when unparsable.
    pub fn bind_ip(&self) -> IpAddr {
        self.bind_address
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            roots: Vec::new(),
            interception: InterceptionConfig::default(),
            server: ServerSection::default(),
            project: ProjectConfig::default(),
            control: ControlConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Builder for PreviewConfig to allow for cleaner configuration creation
#[derive(Default)]
pub struct PreviewConfigBuilder {
    config: PreviewConfig,
}

impl PreviewConfigBuilder {
    /// Set the bind address
    pub fn bind_address(mut self, addr: impl Into<String>) -> Self {
        self.config.bind_address = addr.into();
        self
    }

    /// Serve this folder from startup
    pub fn root(mut self, root: impl Into<String>) -> Self {
        self.config.roots.push(root.into());
        self
    }

    /// Serve these folders from startup, after any already configured
    pub fn roots<I, S>(mut self, roots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.roots.extend(roots.into_iter().map(Into::into));
        self
    }

    /// Set the interception timeout in milliseconds
    pub fn interception_timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.config.interception.timeout_ms = timeout_ms;
        self
    }

    /// Set the drain timeout used when servers close
    pub fn drain_timeout_ms(mut self, drain_timeout_ms: u64) -> Self {
        self.config.server.drain_timeout_ms = drain_timeout_ms;
        self
    }

    /// Set the project root used by the preview capability check
    pub fn project_root(mut self, root: impl Into<String>) -> Self {
        self.config.project.root = Some(root.into());
        self
    }

    /// Enable the HTTP control API on this address
    pub fn control_listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.control.listen_addr = Some(addr.into());
        self
    }

    /// Set the logging section
    pub fn logging(mut self, level: impl Into<String>, json: bool) -> Self {
        self.config.logging = LoggingConfig {
            level: level.into(),
            json,
        };
        self
    }

    /// Build the final PreviewConfig
    pub fn build(self) -> PreviewConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = PreviewConfig::default();
        assert_eq!(config.bind_ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(
            config.interception.timeout(),
            InterceptionTimeout::After(Duration::from_millis(5000))
        );
        assert_eq!(config.project.preview_extensions, vec!["htm", "html"]);
        assert!(config.control.listen_addr.is_none());
    }

    #[test]
    fn test_builder() {
        let config = PreviewConfig::builder()
            .root("/srv/site")
            .interception_timeout_ms(0)
            .project_root("/srv/site")
            .build();
        assert_eq!(config.roots, vec!["/srv/site"]);
        assert_eq!(config.interception.timeout(), InterceptionTimeout::Disabled);
        assert_eq!(config.project.root.as_deref(), Some("/srv/site"));
    }

    #[test]
    fn test_into_builder_appends_roots() {
        let config = PreviewConfig::builder()
            .root("/srv/a")
            .build()
            .into_builder()
            .roots(["/srv/b", "/srv/c"])
            .build();
        assert_eq!(config.roots, vec!["/srv/a", "/srv/b", "/srv/c"]);
    }
}
