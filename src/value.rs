use thiserror::Error;

/// Text nvidia-smi prints when the queried field is not available on the device.
pub const NOT_SUPPORTED: &str = "[Not Supported]";
/// Text nvidia-smi prints when the driver fails to read a field.
pub const UNKNOWN_ERROR: &str = "[Unknown Error]";

/// A field value as nvidia-smi reported it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Number(f64),
    Enabled,
    Disabled,
    NotSupported,
    UnknownError,
}

/// How a reading is reported in the exposition output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Ordinary,
    Unsupported,
    UnknownError,
}

impl Reading {
    pub fn value(self) -> f64 {
        match self {
            Reading::Number(v) => v,
            Reading::Enabled => 1.0,
            Reading::Disabled | Reading::NotSupported | Reading::UnknownError => 0.0,
        }
    }

    pub fn classification(self) -> Classification {
        match self {
            Reading::Number(_) | Reading::Enabled | Reading::Disabled => Classification::Ordinary,
            Reading::NotSupported => Classification::Unsupported,
            Reading::UnknownError => Classification::UnknownError,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unparsable query result value: {raw:?}")]
pub struct ValueError {
    pub raw: String,
}

/// Classifies one raw CSV field.
///
/// A numeric parse is always attempted before any sentinel comparison.
/// Literals out of `f64` range are rejected rather than rounded to infinity.
pub fn classify(raw: &str) -> Result<Reading, ValueError> {
    if let Ok(v) = raw.parse::<f64>() {
        if v.is_infinite() && !is_infinity_literal(raw) {
            return Err(ValueError {
                raw: raw.to_string(),
            });
        }
        return Ok(Reading::Number(v));
    }
    match raw {
        NOT_SUPPORTED => Ok(Reading::NotSupported),
        "Enabled" => Ok(Reading::Enabled),
        "Disabled" => Ok(Reading::Disabled),
        UNKNOWN_ERROR => Ok(Reading::UnknownError),
        _ => Err(ValueError {
            raw: raw.to_string(),
        }),
    }
}

fn is_infinity_literal(raw: &str) -> bool {
    let unsigned = raw.strip_prefix(&['+', '-'][..]).unwrap_or(raw);
    unsigned.eq_ignore_ascii_case("inf") || unsigned.eq_ignore_ascii_case("infinity")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoded(raw: &str) -> (f64, Classification) {
        let reading = classify(raw).unwrap();
        (reading.value(), reading.classification())
    }

    #[test]
    fn plain_numbers_are_ordinary() {
        assert_eq!(decoded("42.5"), (42.5, Classification::Ordinary));
        assert_eq!(decoded("0"), (0.0, Classification::Ordinary));
        assert_eq!(decoded("-3"), (-3.0, Classification::Ordinary));
        assert_eq!(decoded("1e3"), (1000.0, Classification::Ordinary));
    }

    #[test]
    fn sentinels_map_to_known_errors() {
        assert_eq!(decoded("[Not Supported]"), (0.0, Classification::Unsupported));
        assert_eq!(decoded("[Unknown Error]"), (0.0, Classification::UnknownError));
    }

    #[test]
    fn enabled_and_disabled_are_booleans() {
        assert_eq!(decoded("Enabled"), (1.0, Classification::Ordinary));
        assert_eq!(decoded("Disabled"), (0.0, Classification::Ordinary));
    }

    #[test]
    fn sentinels_match_exactly() {
        assert!(classify("enabled").is_err());
        assert!(classify("Not Supported").is_err());
        assert!(classify(" [Unknown Error]").is_err());
    }

    #[test]
    fn garbage_keeps_the_offending_text() {
        let err = classify("garbage").unwrap_err();
        assert_eq!(err.raw, "garbage");
        assert!(err.to_string().contains("\"garbage\""));
    }

    #[test]
    fn float_specials_parse_as_numbers() {
        assert!(classify("NaN").unwrap().value().is_nan());
        assert_eq!(classify("inf").unwrap(), Reading::Number(f64::INFINITY));
        assert_eq!(classify("-Infinity").unwrap(), Reading::Number(f64::NEG_INFINITY));
    }

    #[test]
    fn out_of_range_literals_are_unparseable() {
        assert_eq!(classify("1e400").unwrap_err().raw, "1e400");
        assert!(classify("-1e400").is_err());
        assert_eq!(decoded("1e-400"), (0.0, Classification::Ordinary));
    }
}
