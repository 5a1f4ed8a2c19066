use thiserror::Error;

/// Why a performance state string could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PStateError {
    #[error("pstate value should be at least 2 characters but is {0}")]
    TooShort(usize),
    #[error("expected first character P but received: {0}")]
    WrongPrefix(char),
    #[error("pstate level unparseable: {0:?}")]
    InvalidLevel(String),
}

/// Decodes a performance state such as `P0` or `P12` into its level.
pub fn decode_pstate(raw: &str) -> Result<f64, PStateError> {
    if raw.len() < 2 {
        return Err(PStateError::TooShort(raw.len()));
    }
    let level = match raw.strip_prefix('P') {
        Some(level) => level,
        None => {
            let first = raw.chars().next().unwrap_or_default();
            return Err(PStateError::WrongPrefix(first));
        }
    };
    level
        .parse::<i64>()
        .map(|v| v as f64)
        .map_err(|_| PStateError::InvalidLevel(level.to_string()))
}
