//! Error handling and display for the CLI.

use colored::Colorize;
use thiserror::Error;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// Required auth parameters are absent or the resolved scope is invalid.
    /// Fatal, surfaced verbatim, never retried.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A lookup found zero matches, or more than one. Callers cannot tell
    /// the two apart programmatically; ambiguity must never resolve to an
    /// arbitrary pick.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Malformed structured input, caught before any network call.
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Non-2xx response from a REST service.
    #[error("API error: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
        request_id: Option<String>,
    },

    /// Transport-level failure, propagated unchanged.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// No endpoint in the service catalog matched the requested
    /// service type / region / interface.
    #[error("Endpoint not found: {0}")]
    EndpointNotFound(String),

    /// A registered client factory failed during lazy construction.
    /// Distinct from `UnknownService` so plugin bugs stay visible.
    #[error("Client plugin '{service}' failed to load: {message}")]
    PluginAttribute { service: String, message: String },

    /// No client plugin is registered under this name.
    #[error("No registered service client named '{0}'")]
    UnknownService(String),

    /// A command-level aggregate failure (e.g. partial batch delete).
    #[error("{0}")]
    Command(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CliError {
    /// Create an API error from response details.
    pub fn api(
        status: u16,
        code: impl Into<String>,
        message: impl Into<String>,
        request_id: Option<String>,
    ) -> Self {
        Self::Api {
            status,
            code: code.into(),
            message: message.into(),
            request_id,
        }
    }

    /// Whether this error is a "not found" response from the server.
    /// The lookup fallback is the single place allowed to recover from it.
    pub fn is_http_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    // Check for specific error types and provide hints
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        match cli_err {
            CliError::Config(_) => {
                eprintln!(
                    "\n{}",
                    "Hint: Check your authentication flags or NIMBUS_* environment variables."
                        .yellow()
                );
            }
            CliError::Api { status, .. } if *status == 401 => {
                eprintln!(
                    "\n{}",
                    "Hint: Your credentials were rejected. Check username/password or token."
                        .yellow()
                );
            }
            CliError::Api { status, .. } if *status == 403 => {
                eprintln!(
                    "\n{}",
                    "Hint: You may not have permission for this operation.".yellow()
                );
            }
            CliError::Api {
                request_id: Some(request_id),
                ..
            } => {
                eprintln!("\nRequest ID: {}", request_id);
            }
            CliError::Network(_) => {
                eprintln!(
                    "\n{}",
                    "Hint: Check your network connection and the auth URL.".yellow()
                );
            }
            CliError::PluginAttribute { .. } => {
                eprintln!(
                    "\n{}",
                    "Hint: A client plugin failed to initialize. Run with RUST_LOG=debug."
                        .yellow()
                );
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_404_is_not_found() {
        let err = CliError::api(404, "not_found", "no such server", None);
        assert!(err.is_http_not_found());
    }

    #[test]
    fn other_statuses_are_not_not_found() {
        assert!(!CliError::api(500, "boom", "server error", None).is_http_not_found());
        assert!(!CliError::NotFound("server 'x'".into()).is_http_not_found());
    }
}
