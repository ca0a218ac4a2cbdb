use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] moodfeed_core::ValidationError),

    #[error("configuration error: {0}")]
    Config(#[from] moodfeed_core::CoreError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) => 2,
            Self::Config(_) => 7,
            Self::Serialization(_) => 4,
            Self::Io(_) => 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use moodfeed_core::{CoreError, ValidationError};

    #[test]
    fn exit_codes_distinguish_input_from_config_errors() {
        assert_eq!(CliError::from(ValidationError::EmptySymbol).exit_code(), 2);
        assert_eq!(
            CliError::from(CoreError::InvalidEnv {
                name: String::from("MOODFEED_TIMEOUT_MS"),
                value: String::from("soon"),
            })
            .exit_code(),
            7
        );
    }
}
