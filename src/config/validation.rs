use std::{
    net::{IpAddr, SocketAddr},
    path::Path,
};

use crate::config::models::{ControlConfig, PreviewConfig, ProjectConfig};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid bind address '{address}': {reason}")]
    InvalidBindAddress { address: String, reason: String },

    #[error("Invalid root '{root}': {reason}")]
    InvalidRoot { root: String, reason: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Preview configuration validator
pub struct PreviewConfigValidator;

impl PreviewConfigValidator {
    /// Validate the entire preview configuration, reporting every problem at once
    pub fn validate(config: &PreviewConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_bind_address(&config.bind_address) {
            errors.push(e);
        }

        for root in &config.roots {
            if let Err(e) = Self::validate_root(root) {
                errors.push(e);
            }
        }

        if let Err(mut project_errors) = Self::validate_project(&config.project) {
            errors.append(&mut project_errors);
        }

        if let Err(e) = Self::validate_control(&config.control) {
            errors.push(e);
        }

        if let Err(e) = Self::validate_log_level(&config.logging.level) {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Static servers only ever bind a loopback IP; the port is always ephemeral
    fn validate_bind_address(address: &str) -> ValidationResult<()> {
        let Ok(ip) = address.parse::<IpAddr>() else {
            return Err(ValidationError::InvalidBindAddress {
                address: address.to_string(),
                reason: "Must be an IP address without a port (e.g., '127.0.0.1')".to_string(),
            });
        };
        if !ip.is_loopback() {
            return Err(ValidationError::InvalidBindAddress {
                address: address.to_string(),
                reason: "Must be a loopback address (e.g., '127.0.0.1' or '::1')".to_string(),
            });
        }
        Ok(())
    }

    fn validate_root(root: &str) -> ValidationResult<()> {
        let path = Path::new(root);
        if !path.exists() {
            return Err(ValidationError::InvalidRoot {
                root: root.to_string(),
                reason: "Path does not exist".to_string(),
            });
        }
        if !path.is_dir() {
            return Err(ValidationError::InvalidRoot {
                root: root.to_string(),
                reason: "Path is not a directory".to_string(),
            });
        }
        Ok(())
    }

    fn validate_project(project: &ProjectConfig) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Some(root) = &project.root {
            if let Err(e) = Self::validate_root(root) {
                errors.push(e);
            }
        }

        if project.preview_extensions.is_empty() {
            errors.push(ValidationError::InvalidField {
                field: "project.preview_extensions".to_string(),
                message: "At least one extension is required".to_string(),
            });
        }

        for ext in &project.preview_extensions {
            if ext.is_empty() || ext.starts_with('.') {
                errors.push(ValidationError::InvalidField {
                    field: "project.preview_extensions".to_string(),
                    message: format!("Extension '{ext}' must be non-empty and have no leading dot"),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_control(control: &ControlConfig) -> ValidationResult<()> {
        if let Some(addr) = &control.listen_addr {
            if addr.parse::<SocketAddr>().is_err() {
                return Err(ValidationError::InvalidField {
                    field: "control.listen_addr".to_string(),
                    message: format!(
                        "'{addr}' must be in format 'IP:PORT' (e.g., '127.0.0.1:7070')"
                    ),
                });
            }
        }
        if control.command_buffer == 0 {
            return Err(ValidationError::InvalidField {
                field: "control.command_buffer".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    fn validate_log_level(level: &str) -> ValidationResult<()> {
        tracing_subscriber::EnvFilter::try_new(level)
            .map(|_| ())
            .map_err(|e| ValidationError::InvalidField {
                field: "logging.level".to_string(),
                message: e.to_string(),
            })
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
