use crate::obis_code::ObisCode;
use thiserror::Error;

/// Main error type for DLMS/COSEM operations
///
/// Variants carry enough context (field name, attribute/method id, byte counts,
/// object reference) to build a diagnostic message, and [`DlmsError::kind`]
/// collapses them into the three-way taxonomy a session layer uses to pick a
/// response APDU.
#[derive(Error, Debug)]
pub enum DlmsError {
    /// A value failed a field-level constraint
    #[error("Validation error: {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Buffer ended before a fixed-size header was complete
    #[error("Protocol error: buffer truncated, need {needed} bytes but only {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("Protocol error: invalid attribute id {attribute_id} for class {class_id}")]
    UnknownAttribute { class_id: u16, attribute_id: u8 },

    #[error("Protocol error: invalid method id {method_id} for class {class_id}")]
    UnknownMethod { class_id: u16, method_id: u8 },

    #[error("Protocol error: attribute {attribute_id} of class {class_id} is read-only")]
    ReadOnlyAttribute { class_id: u16, attribute_id: u8 },

    #[error("Protocol error: no object of class {class_id} with logical name {logical_name}")]
    ObjectNotFound { class_id: u16, logical_name: ObisCode },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    #[error("Timeout: {0}")]
    Timeout(String),
}

/// Coarse error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Protocol,
    Transport,
}

impl DlmsError {
    /// Shorthand for a [`DlmsError::Validation`] error
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        DlmsError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            DlmsError::Validation { .. } => ErrorKind::Validation,
            DlmsError::Protocol(_)
            | DlmsError::Truncated { .. }
            | DlmsError::UnknownAttribute { .. }
            | DlmsError::UnknownMethod { .. }
            | DlmsError::ReadOnlyAttribute { .. }
            | DlmsError::ObjectNotFound { .. } => ErrorKind::Protocol,
            DlmsError::Transport(_) | DlmsError::Connection(_) | DlmsError::Timeout(_) => {
                ErrorKind::Transport
            }
        }
    }

    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }

    pub fn is_protocol(&self) -> bool {
        self.kind() == ErrorKind::Protocol
    }

    pub fn is_transport(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }
}

/// Result type alias for DLMS/COSEM operations
pub type DlmsResult<T> = Result<T, DlmsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            DlmsError::validation("status", "out of range").kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            DlmsError::Truncated { needed: 3, available: 1 }.kind(),
            ErrorKind::Protocol
        );
        assert_eq!(
            DlmsError::ReadOnlyAttribute { class_id: 3, attribute_id: 1 }.kind(),
            ErrorKind::Protocol
        );
        assert_eq!(DlmsError::Timeout("connect".into()).kind(), ErrorKind::Transport);

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(DlmsError::from(io).is_transport());
    }

    #[test]
    fn test_error_messages_carry_context() {
        let err = DlmsError::UnknownAttribute { class_id: 3, attribute_id: 9 };
        assert_eq!(
            err.to_string(),
            "Protocol error: invalid attribute id 9 for class 3"
        );

        let err = DlmsError::validation("C", "value 300 is outside 0..=255");
        assert!(err.to_string().contains("C: value 300"));
    }
}
