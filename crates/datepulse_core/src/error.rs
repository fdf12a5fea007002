use thiserror::Error;

/// Setup failures. These abort a run before any stage does work.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("missing credential {var} required by the {provider} provider")]
    MissingCredential { provider: String, var: &'static str },

    #[error("unknown {kind} provider '{name}'")]
    UnknownProvider { kind: &'static str, name: String },

    #[error("invalid value for {knob}: {reason}")]
    InvalidValue { knob: &'static str, reason: String },
}

/// Rejections for embedding vectors crossing the persistence boundary.
#[derive(Debug, Error, PartialEq)]
pub enum VectorError {
    #[error("embedding vector is empty")]
    Empty,

    #[error("embedding component {index} is not finite")]
    NonFinite { index: usize },

    #[error("embedding has dimension {actual}, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Error, PartialEq)]
pub enum BreakdownError {
    #[error("fraction for {platform} is outside [0, 1]: {value}")]
    OutOfRange { platform: String, value: f64 },

    #[error("fractions sum to {sum}, expected ~1.0")]
    BadTotal { sum: f64 },
}
