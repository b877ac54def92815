//! Data-access result codes reported back to a client when a request fails

use dlms_core::DlmsError;

/// DLMS data-access-result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataAccessResult {
    Success = 0,
    HardwareFault = 1,
    TemporaryFailure = 2,
    ReadWriteDenied = 3,
    ObjectUndefined = 4,
    ObjectClassInconsistent = 9,
    ObjectUnavailable = 11,
    TypeUnmatched = 12,
    ScopeOfAccessViolated = 13,
    OtherReason = 250,
}

impl DataAccessResult {
    /// Result code describing `error`
    pub fn from_error(error: &DlmsError) -> Self {
        match error {
            DlmsError::Validation { .. } => DataAccessResult::TypeUnmatched,
            DlmsError::UnknownAttribute { .. } | DlmsError::UnknownMethod { .. } => {
                DataAccessResult::ObjectUndefined
            }
            DlmsError::ReadOnlyAttribute { .. } => DataAccessResult::ReadWriteDenied,
            DlmsError::ObjectNotFound { .. } => DataAccessResult::ObjectUnavailable,
            DlmsError::Timeout(_) => DataAccessResult::TemporaryFailure,
            DlmsError::Protocol(_)
            | DlmsError::Truncated { .. }
            | DlmsError::Transport(_)
            | DlmsError::Connection(_) => DataAccessResult::OtherReason,
        }
    }
}

impl TryFrom<u8> for DataAccessResult {
    type Error = DlmsError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => DataAccessResult::Success,
            1 => DataAccessResult::HardwareFault,
            2 => DataAccessResult::TemporaryFailure,
            3 => DataAccessResult::ReadWriteDenied,
            4 => DataAccessResult::ObjectUndefined,
            9 => DataAccessResult::ObjectClassInconsistent,
            11 => DataAccessResult::ObjectUnavailable,
            12 => DataAccessResult::TypeUnmatched,
            13 => DataAccessResult::ScopeOfAccessViolated,
            250 => DataAccessResult::OtherReason,
            other => {
                return Err(DlmsError::validation(
                    "data_access_result",
                    format!("unknown code {}", other),
                ))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_error() {
        assert_eq!(
            DataAccessResult::from_error(&DlmsError::UnknownMethod { class_id: 9, method_id: 4 }),
            DataAccessResult::ObjectUndefined
        );
        assert_eq!(
            DataAccessResult::from_error(&DlmsError::validation("status", "256")),
            DataAccessResult::TypeUnmatched
        );
        assert_eq!(
            DataAccessResult::from_error(&DlmsError::Protocol("script 9 does not exist".into())),
            DataAccessResult::OtherReason
        );
    }

    #[test]
    fn test_code_round_trip() {
        for result in [
            DataAccessResult::Success,
            DataAccessResult::ReadWriteDenied,
            DataAccessResult::OtherReason,
        ] {
            assert_eq!(DataAccessResult::try_from(result as u8).unwrap(), result);
        }
        assert!(DataAccessResult::try_from(200).is_err());
    }
}
