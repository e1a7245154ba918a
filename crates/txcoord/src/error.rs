use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to read playbook at '{path}'")]
    ReadPlaybook {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse playbook at '{path}'")]
    ParsePlaybook {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("transaction #{index} in playbook is invalid: {reason}")]
    InvalidTransaction { index: usize, reason: String },

    #[error("configuration error")]
    Config(#[from] txcoord_coordinator::ConfigError),

    #[error("coordinator error")]
    Coordinator(#[from] txcoord_coordinator::CoordinatorError),

    #[error("failed to start async runtime")]
    Runtime(#[source] std::io::Error),

    #[error("failed to render JSON output")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::CliError;

    #[test]
    fn read_playbook_error_includes_path() {
        let err = CliError::ReadPlaybook {
            path: PathBuf::from("/plays/run.toml"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };

        assert!(err.to_string().contains("/plays/run.toml"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn config_error_converts_via_from() {
        let config_err = txcoord_coordinator::ConfigError::ZeroEventCapacity;

        let cli_err: CliError = config_err.into();

        assert!(matches!(cli_err, CliError::Config(_)));
        assert!(std::error::Error::source(&cli_err).is_some());
    }

    #[test]
    fn invalid_transaction_names_its_position() {
        let err = CliError::InvalidTransaction {
            index: 3,
            reason: "no participants".to_string(),
        };

        assert_eq!(
            err.to_string(),
            "transaction #3 in playbook is invalid: no participants"
        );
    }
}
