//! Errors on invalid command line arguments.

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ArgError {
    #[error("invalid value {value:?} for --{flag}: {reason}")]
    InvalidValue {
        flag: &'static str,
        value: String,
        reason: String,
    },
    #[error("--{flag} requires --{requires}")]
    MissingFlag {
        flag: &'static str,
        requires: &'static str,
    },
}

impl ArgError {
    pub fn invalid_value(flag: &'static str, value: &str, reason: impl ToString) -> Self {
        ArgError::InvalidValue {
            flag,
            value: value.to_owned(),
            reason: reason.to_string(),
        }
    }
}
