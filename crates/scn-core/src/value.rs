use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A numeric field as authored in the document.
///
/// The raw text is kept for verbatim re-emission and parsed exactly once.
/// Text that is not a finite number reads as `0.0`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NumericText {
    raw: String,
    value: f64,
    parsed: bool,
}

impl NumericText {
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let parsed = raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite());
        Self {
            value: parsed.unwrap_or(0.0),
            parsed: parsed.is_some(),
            raw,
        }
    }

    pub fn from_f64(value: f64) -> Self {
        Self {
            raw: format_number(value),
            value,
            parsed: true,
        }
    }

    pub fn zero() -> Self {
        Self::from_f64(0.0)
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn is_numeric(&self) -> bool {
        self.parsed
    }

    pub fn is_empty(&self) -> bool {
        self.raw.trim().is_empty()
    }
}

impl fmt::Display for NumericText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for NumericText {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl Serialize for NumericText {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for NumericText {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(raw))
    }
}

/// Shortest decimal form of a number, `10` rather than `10.0`.
pub fn format_number(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    format!("{}", value)
}

/// Lenient number parse used for authored attributes.
pub fn parse_number(raw: &str) -> f64 {
    NumericText::parse(raw).value()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_once_and_keeps_raw_text() {
        let speed = NumericText::parse("12.000");
        assert_eq!(speed.raw(), "12.000");
        assert_eq!(speed.value(), 12.0);
        assert!(speed.is_numeric());
        assert_eq!(speed.to_string(), "12.000");
    }

    #[test]
    fn unresolved_tokens_read_as_zero() {
        let unresolved = NumericText::parse("$Speed");
        assert_eq!(unresolved.value(), 0.0);
        assert!(!unresolved.is_numeric());
        assert_eq!(unresolved.raw(), "$Speed");

        assert_eq!(NumericText::parse("NaN").value(), 0.0);
        assert_eq!(NumericText::parse("").value(), 0.0);
        assert!(NumericText::parse(" ").is_empty());
    }

    #[test]
    fn format_number_drops_trailing_zero_fraction() {
        assert_eq!(format_number(10.0), "10");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(NumericText::from_f64(7.5).raw(), "7.5");
    }

    #[test]
    fn serializes_as_raw_string() {
        let json = serde_json::to_string(&NumericText::parse("1.50")).expect("serialize");
        assert_eq!(json, "\"1.50\"");
        let back: NumericText = serde_json::from_str("\"3\"").expect("deserialize");
        assert_eq!(back.value(), 3.0);
    }
}
