//! Auth-Failure Classifier (spec.md §4.9): maps exchange error payloads to
//! `AuthenticationFailed` vs. transient/rejected.

/// Classification of one `(code, message)` pair from the exchange's error
/// envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    AuthenticationFailed,
    Rejected,
    Transient,
}

/// Holds the documented session-invalidation codes and the
/// supplemental-authentication / session-expiration message patterns used to
/// classify exchange error payloads. Both lists are configuration, not
/// hardcoded protocol knowledge, per spec.md §4.9.
#[derive(Debug, Clone)]
pub struct AuthFailureClassifier {
    revoked_codes: Vec<i64>,
    message_patterns: Vec<String>,
}

impl Default for AuthFailureClassifier {
    fn default() -> Self {
        Self {
            revoked_codes: vec![401, 10003, 10004],
            message_patterns: vec![
                "session invalid".to_string(),
                "session expired".to_string(),
                "supplemental authentication".to_string(),
                "please verify".to_string(),
                "re-login".to_string(),
                "login again".to_string(),
            ],
        }
    }
}

impl AuthFailureClassifier {
    pub fn with_rules(revoked_codes: Vec<i64>, message_patterns: Vec<String>) -> Self {
        Self {
            revoked_codes,
            message_patterns,
        }
    }

    pub fn classify(&self, code: i64, message: &str) -> ErrorClass {
        if self.revoked_codes.contains(&code) {
            return ErrorClass::AuthenticationFailed;
        }
        let lowered = message.to_ascii_lowercase();
        if self
            .message_patterns
            .iter()
            .any(|pat| lowered.contains(&pat.to_ascii_lowercase()))
        {
            return ErrorClass::AuthenticationFailed;
        }
        // A structurally-clear validation error (exchange convention: codes
        // in the 4xxx "order rejected" band) is Rejected rather than
        // Transient so callers don't waste a retry on it.
        if (4000..5000).contains(&code) {
            return ErrorClass::Rejected;
        }
        ErrorClass::Transient
    }
}
