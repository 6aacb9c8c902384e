//! Business-error classification.
//!
//! Connectors report `success=false` with free-form codes and messages. A
//! classifier maps them onto the closed [`ErrorClass`] set used by outcome
//! recording and compensation.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::ErrorClass;

pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, code: Option<&str>, message: &str) -> ErrorClass;
}

struct ClassPatterns {
    auth: Regex,
    rate_limit: Regex,
    timeout: Regex,
    validation: Regex,
}

static CLASS_PATTERNS: LazyLock<ClassPatterns> = LazyLock::new(|| ClassPatterns {
    auth: Regex::new(
        r"(?i)\b(unauthori[sz]ed|unauthenticated|forbidden|permission[\s_]denied|access[\s_]denied|invalid[\s_](?:token|credentials?|api[\s_]key)|expired[\s_]token|auth(?:entication|orization)?[\s_]?(?:failed|error|required))\b|\b40[13]\b",
    )
    .expect("Invalid auth regex"),
    rate_limit: Regex::new(
        r"(?i)rate[\s_-]?limit|too[\s_]many[\s_]requests|throttl|quota[\s_]exceeded|\b429\b",
    )
    .expect("Invalid rate-limit regex"),
    timeout: Regex::new(r"(?i)\btimed?[\s_-]?out\b|deadline[\s_]exceeded|\b504\b")
        .expect("Invalid timeout regex"),
    validation: Regex::new(
        r"(?i)\binvalid|validation|\brequired\b|\bmissing\b|malformed|bad[\s_]request|unprocessable|\b(?:400|422)\b",
    )
    .expect("Invalid validation regex"),
});

/// Substring heuristics over the error code and message.
///
/// Checked in order AUTH, RATE_LIMIT, TIMEOUT, VALIDATION so that, for
/// example, "invalid token" is an auth failure and not a validation one.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicClassifier;

impl ErrorClassifier for HeuristicClassifier {
    fn classify(&self, code: Option<&str>, message: &str) -> ErrorClass {
        let text = match code {
            Some(code) => format!("{} {}", code, message),
            None => message.to_string(),
        };
        let p = &*CLASS_PATTERNS;
        if p.auth.is_match(&text) {
            ErrorClass::Auth
        } else if p.rate_limit.is_match(&text) {
            ErrorClass::RateLimit
        } else if p.timeout.is_match(&text) {
            ErrorClass::Timeout
        } else if p.validation.is_match(&text) {
            ErrorClass::Validation
        } else {
            ErrorClass::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(code: Option<&str>, message: &str) -> ErrorClass {
        HeuristicClassifier.classify(code, message)
    }

    #[test]
    fn test_auth() {
        assert_eq!(classify(None, "Unauthorized: token rejected"), ErrorClass::Auth);
        assert_eq!(classify(Some("403"), "nope"), ErrorClass::Auth);
        assert_eq!(classify(None, "invalid token supplied"), ErrorClass::Auth);
        assert_eq!(classify(Some("PERMISSION_DENIED"), ""), ErrorClass::Auth);
    }

    #[test]
    fn test_rate_limit() {
        assert_eq!(classify(None, "Rate limit exceeded"), ErrorClass::RateLimit);
        assert_eq!(classify(None, "Too many requests"), ErrorClass::RateLimit);
        assert_eq!(classify(Some("RATE_LIMITED"), "slow down"), ErrorClass::RateLimit);
        assert_eq!(classify(None, "request throttled"), ErrorClass::RateLimit);
    }

    #[test]
    fn test_timeout() {
        assert_eq!(classify(None, "upstream timed out"), ErrorClass::Timeout);
        assert_eq!(classify(None, "Timeout talking to CRM"), ErrorClass::Timeout);
        assert_eq!(classify(None, "deadline exceeded"), ErrorClass::Timeout);
    }

    #[test]
    fn test_validation() {
        assert_eq!(classify(None, "field 'email' is required"), ErrorClass::Validation);
        assert_eq!(classify(Some("INVALID_ARGUMENT"), "bad"), ErrorClass::Validation);
        assert_eq!(classify(Some("422"), "cannot process"), ErrorClass::Validation);
    }

    #[test]
    fn test_unknown() {
        assert_eq!(classify(None, "something odd happened"), ErrorClass::Unknown);
        assert_eq!(classify(None, ""), ErrorClass::Unknown);
    }
}
