use crate::error::ImportError;
use crate::model::{FieldKind, Value};

/// String to typed-value conversion used by record readers.
pub trait ConversionService: Send + Sync {
    fn can_convert(&self, raw: &str, kind: FieldKind) -> bool;

    /// Converts a non-empty cell. The caller attaches line and field context
    /// to the error.
    fn convert(&self, raw: &str, kind: FieldKind) -> Result<Value, ConversionFailure>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionFailure;

impl ConversionFailure {
    pub fn at(self, line: u64, field: &str, raw: &str, kind: FieldKind) -> ImportError {
        ImportError::DataConversion {
            line,
            field: field.to_string(),
            value: raw.to_string(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConversionService;

impl ConversionService for DefaultConversionService {
    fn can_convert(&self, raw: &str, kind: FieldKind) -> bool {
        self.convert(raw, kind).is_ok()
    }

    fn convert(&self, raw: &str, kind: FieldKind) -> Result<Value, ConversionFailure> {
        let trimmed = raw.trim();
        match kind {
            FieldKind::Text => Ok(Value::Text(trimmed.to_string())),
            FieldKind::Integer => parse_integer(trimmed).map(Value::Integer),
            FieldKind::Float => trimmed
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| ConversionFailure),
            FieldKind::Boolean => parse_bool(trimmed).map(Value::Boolean),
        }
    }
}

fn parse_integer(value: &str) -> Result<i64, ConversionFailure> {
    if let Ok(parsed) = value.parse::<i64>() {
        return Ok(parsed);
    }
    // Exported tables often write whole numbers as "1200.0" or "1.2e3".
    let parsed = value.parse::<f64>().map_err(|_| ConversionFailure)?;
    if parsed.is_finite() && parsed.fract() == 0.0 && parsed.abs() < i64::MAX as f64 {
        Ok(parsed as i64)
    } else {
        Err(ConversionFailure)
    }
}

pub(crate) fn parse_bool(value: &str) -> Result<bool, ConversionFailure> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Ok(true),
        "false" | "f" | "no" | "n" | "0" => Ok(false),
        _ => Err(ConversionFailure),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_numbers() {
        let service = DefaultConversionService;
        assert_eq!(
            service.convert(" 42 ", FieldKind::Integer),
            Ok(Value::Integer(42))
        );
        assert_eq!(
            service.convert("1200.0", FieldKind::Integer),
            Ok(Value::Integer(1200))
        );
        assert_eq!(
            service.convert("-0.25", FieldKind::Float),
            Ok(Value::Float(-0.25))
        );
        assert!(!service.can_convert("12.5", FieldKind::Integer));
        assert!(!service.can_convert("abc", FieldKind::Float));
    }

    #[test]
    fn converts_booleans() {
        let service = DefaultConversionService;
        assert_eq!(
            service.convert("Yes", FieldKind::Boolean),
            Ok(Value::Boolean(true))
        );
        assert_eq!(
            service.convert("0", FieldKind::Boolean),
            Ok(Value::Boolean(false))
        );
        assert!(!service.can_convert("maybe", FieldKind::Boolean));
    }
}
