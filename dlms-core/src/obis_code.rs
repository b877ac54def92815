use crate::error::{DlmsError, DlmsResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Value marking a field as "any" when an OBIS code is used as a match pattern
pub const WILDCARD: u8 = 255;

const FIELD_NAMES: [&str; 6] = ["A", "B", "C", "D", "E", "F"];

static DOT_FORMAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9]+)\.([0-9]+)\.([0-9]+)\.([0-9]+)\.([0-9]+)\.([0-9]+)$")
        .expect("valid OBIS dot-format regex")
});

static EXTENDED_FORMAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9]+-[0-9]+:[0-9]+\.[0-9]+\.[0-9]+(?:[.*][0-9]+)?$")
        .expect("valid OBIS extended-format regex")
});

/// OBIS (Object Identification System) code for identifying COSEM objects
///
/// OBIS codes are 6-byte identifiers used in DLMS/COSEM to uniquely identify
/// objects in a logical device. The canonical text form is the plain
/// dot-separated form `A.B.C.D.E.F`; the `A-B:C.D.E*F` notation is rejected
/// rather than guessed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObisCode {
    bytes: [u8; 6],
}

impl ObisCode {
    /// Create a new OBIS code from individual bytes
    pub const fn new(a: u8, b: u8, c: u8, d: u8, e: u8, f: u8) -> Self {
        Self {
            bytes: [a, b, c, d, e, f],
        }
    }

    /// Parse an OBIS code from its canonical string form `"A.B.C.D.E.F"`
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the offending field when a value is
    /// outside `0..=255`, and a validation error naming the format when the
    /// string is not in dot form.
    pub fn from_string(s: &str) -> DlmsResult<Self> {
        let s = s.trim();
        let Some(caps) = DOT_FORMAT.captures(s) else {
            if EXTENDED_FORMAT.is_match(s) {
                return Err(DlmsError::validation(
                    "obis",
                    format!("'{}' uses the A-B:C.D.E*F form, expected A.B.C.D.E.F", s),
                ));
            }
            return Err(DlmsError::validation(
                "obis",
                format!("'{}' is not six dot-separated values", s),
            ));
        };

        let mut bytes = [0u8; 6];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let part = &caps[i + 1];
            *byte = part.parse::<u8>().map_err(|_| {
                DlmsError::validation(
                    FIELD_NAMES[i],
                    format!("value {} is outside 0..=255", part),
                )
            })?;
        }
        Ok(Self { bytes })
    }

    /// Create an OBIS code from a 6-byte sequence
    pub fn from_bytes(bytes: &[u8]) -> DlmsResult<Self> {
        let bytes: [u8; 6] = bytes.try_into().map_err(|_| {
            DlmsError::validation(
                "obis",
                format!("expected 6 bytes, got {}", bytes.len()),
            )
        })?;
        Ok(Self { bytes })
    }

    /// Create an OBIS code from six integer values
    ///
    /// Every value must be an integer in `0..=255`.
    pub fn from_array(values: &[i64]) -> DlmsResult<Self> {
        if values.len() != 6 {
            return Err(DlmsError::validation(
                "obis",
                format!("expected 6 values, got {}", values.len()),
            ));
        }
        let mut bytes = [0u8; 6];
        for (i, (byte, value)) in bytes.iter_mut().zip(values).enumerate() {
            *byte = u8::try_from(*value).map_err(|_| {
                DlmsError::validation(
                    FIELD_NAMES[i],
                    format!("value {} is outside 0..=255", value),
                )
            })?;
        }
        Ok(Self { bytes })
    }

    /// Get the OBIS code as a byte array
    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.bytes
    }

    /// Get the OBIS code as a copied byte array
    pub fn to_bytes(&self) -> [u8; 6] {
        self.bytes
    }

    /// Get the six fields as integers, the inverse of [`ObisCode::from_array`]
    pub fn to_array(&self) -> [i64; 6] {
        self.bytes.map(i64::from)
    }

    pub fn a(&self) -> u8 {
        self.bytes[0]
    }

    pub fn b(&self) -> u8 {
        self.bytes[1]
    }

    pub fn c(&self) -> u8 {
        self.bytes[2]
    }

    pub fn d(&self) -> u8 {
        self.bytes[3]
    }

    pub fn e(&self) -> u8 {
        self.bytes[4]
    }

    pub fn f(&self) -> u8 {
        self.bytes[5]
    }

    /// Check whether the field at `index` holds the wildcard value 255
    ///
    /// Indices past the sixth field are never wildcards.
    pub fn is_wildcard(&self, index: usize) -> bool {
        self.bytes.get(index) == Some(&WILDCARD)
    }

    /// Check whether this code matches `pattern`
    ///
    /// A field matches when it equals the pattern's field or the pattern's
    /// field is a wildcard. Wildcards in `self` are compared literally.
    pub fn matches(&self, pattern: &ObisCode) -> bool {
        self.bytes
            .iter()
            .zip(pattern.bytes.iter())
            .enumerate()
            .all(|(i, (value, expected))| pattern.is_wildcard(i) || value == expected)
    }
}

impl fmt::Display for ObisCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}.{}.{}",
            self.bytes[0], self.bytes[1], self.bytes[2],
            self.bytes[3], self.bytes[4], self.bytes[5]
        )
    }
}

impl FromStr for ObisCode {
    type Err = DlmsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_string(s)
    }
}

impl From<[u8; 6]> for ObisCode {
    fn from(bytes: [u8; 6]) -> Self {
        Self { bytes }
    }
}

impl TryFrom<&[u8]> for ObisCode {
    type Error = DlmsError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Self::from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_obis_code_new() {
        let code = ObisCode::new(1, 1, 1, 8, 0, 255);
        assert_eq!(code.a(), 1);
        assert_eq!(code.d(), 8);
        assert_eq!(code.f(), 255);
    }

    #[test]
    fn test_obis_code_from_string() {
        let code = ObisCode::from_string("1.1.1.8.0.255").unwrap();
        assert_eq!(code, ObisCode::new(1, 1, 1, 8, 0, 255));

        let parsed: ObisCode = " 0.0.10.0.0.255 ".parse().unwrap();
        assert_eq!(parsed, ObisCode::new(0, 0, 10, 0, 0, 255));
    }

    #[test]
    fn test_obis_code_display() {
        let code = ObisCode::new(1, 1, 1, 8, 0, 255);
        assert_eq!(format!("{}", code), "1.1.1.8.0.255");
    }

    #[test]
    fn test_string_and_buffer_round_trip() {
        for code in [
            ObisCode::new(0, 0, 0, 0, 0, 0),
            ObisCode::new(255, 255, 255, 255, 255, 255),
            ObisCode::new(1, 0, 99, 98, 1, 7),
        ] {
            assert_eq!(ObisCode::from_string(&code.to_string()).unwrap(), code);
            assert_eq!(ObisCode::from_bytes(&code.to_bytes()).unwrap(), code);
            assert_eq!(ObisCode::from_array(&code.to_array()).unwrap(), code);
        }
    }

    #[test]
    fn test_out_of_range_field_is_named() {
        match ObisCode::from_string("1.0.256.8.0.255") {
            Err(DlmsError::Validation { field, .. }) => assert_eq!(field, "C"),
            other => panic!("expected validation error, got {:?}", other),
        }

        match ObisCode::from_array(&[1, 0, 1, 8, -1, 255]) {
            Err(DlmsError::Validation { field, .. }) => assert_eq!(field, "E"),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_inputs() {
        assert!(ObisCode::from_string("1.0.1.8.0").unwrap_err().is_validation());
        assert!(ObisCode::from_string("1.0.1.8.0.x").is_err());
        assert!(ObisCode::from_string("").is_err());
        assert!(ObisCode::from_bytes(&[1, 2, 3]).is_err());
        assert!(ObisCode::from_array(&[1, 2, 3, 4, 5, 6, 7]).is_err());
    }

    #[test]
    fn test_non_ascii_digits_are_a_format_error() {
        // Arabic-Indic one and fullwidth two
        for input in ["\u{0661}.0.1.8.0.255", "1.0.\u{FF12}.8.0.255"] {
            match ObisCode::from_string(input) {
                Err(DlmsError::Validation { field, .. }) => assert_eq!(field, "obis"),
                other => panic!("expected format error for {:?}, got {:?}", input, other),
            }
        }
    }

    #[test]
    fn test_extended_format_rejected() {
        let err = ObisCode::from_string("1-0:1.8.0*255").unwrap_err();
        assert!(err.to_string().contains("A-B:C.D.E*F"));
        assert!(ObisCode::from_string("1-0:1.8.0.255").is_err());
    }

    #[test]
    fn test_wildcard_matching() {
        let pattern = ObisCode::new(1, 255, 1, 8, 255, 255);
        assert!(ObisCode::new(1, 0, 1, 8, 0, 255).matches(&pattern));
        assert!(!ObisCode::new(2, 0, 1, 8, 0, 255).matches(&pattern));

        // Wildcards are only honoured on the pattern side
        assert!(!pattern.matches(&ObisCode::new(1, 0, 1, 8, 0, 255)));

        assert!(pattern.is_wildcard(1));
        assert!(!pattern.is_wildcard(0));
        assert!(!pattern.is_wildcard(6));
    }

    #[test]
    fn test_serde_round_trip() {
        let code = ObisCode::new(1, 0, 1, 8, 0, 255);
        let json = serde_json::to_string(&code).unwrap();
        let back: ObisCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, code);
    }
}
