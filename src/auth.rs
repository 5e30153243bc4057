//! Slack credential parsing for the IRC PASS command.
//!
//! The PASS value is either a bare legacy token, or a workspace token and
//! auth cookie joined by `|`. Parse failures map to ERR_PASSWDMISMATCH (464).

use thiserror::Error;

/// Parsed PASS credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
    /// Auth cookie, sent with https API requests. Empty for legacy tokens.
    pub cookie: String,
}

impl Credentials {
    /// True when the password was a single legacy token with no cookie.
    pub fn is_legacy(&self) -> bool {
        self.cookie.is_empty()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialsError {
    #[error("auth cookie is set, but token does not start with xoxc-")]
    NotWorkspaceToken,
    #[error("auth cookie is empty")]
    EmptyCookie,
    #[error("auth cookie must have the format 'd=XXX;'")]
    MalformedCookie,
    #[error("expected 1 or 2 '|'-separated components, got {0}")]
    WrongComponentCount(usize),
}

/// Parse the PASS value into a token and an optional auth cookie.
///
/// One segment is a legacy token. Two segments require an `xoxc-` token and
/// a cookie of the form `d=...;`.
pub fn parse_credentials(password: &str) -> Result<Credentials, CredentialsError> {
    let parts: Vec<&str> = password.split('|').collect();
    match parts.as_slice() {
        [token] => Ok(Credentials {
            token: token.to_string(),
            cookie: String::new(),
        }),
        [token, cookie] => {
            if !token.starts_with("xoxc-") {
                return Err(CredentialsError::NotWorkspaceToken);
            }
            if cookie.is_empty() {
                return Err(CredentialsError::EmptyCookie);
            }
            if !cookie.starts_with("d=") || !cookie.ends_with(';') {
                return Err(CredentialsError::MalformedCookie);
            }
            Ok(Credentials {
                token: token.to_string(),
                cookie: cookie.to_string(),
            })
        }
        parts => Err(CredentialsError::WrongComponentCount(parts.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_token_with_cookie() {
        let creds = parse_credentials("xoxc-ABC|d=DEF;").unwrap();
        assert_eq!(creds.token, "xoxc-ABC");
        assert_eq!(creds.cookie, "d=DEF;");
        assert!(!creds.is_legacy());
    }

    #[test]
    fn legacy_token() {
        let creds = parse_credentials("xoxp-XYZ").unwrap();
        assert_eq!(creds.token, "xoxp-XYZ");
        assert_eq!(creds.cookie, "");
        assert!(creds.is_legacy());
    }

    #[test]
    fn empty_cookie_rejected() {
        assert_eq!(
            parse_credentials("xoxc-ABC|"),
            Err(CredentialsError::EmptyCookie)
        );
    }

    #[test]
    fn cookie_with_legacy_token_rejected() {
        assert_eq!(
            parse_credentials("xoxp-XYZ|d=DEF;"),
            Err(CredentialsError::NotWorkspaceToken)
        );
    }

    #[test]
    fn too_many_components_rejected() {
        assert_eq!(
            parse_credentials("a|b|c"),
            Err(CredentialsError::WrongComponentCount(3))
        );
    }

    #[test]
    fn cookie_without_terminator_rejected() {
        assert_eq!(
            parse_credentials("xoxc-ABC|d=DEF"),
            Err(CredentialsError::MalformedCookie)
        );
        assert_eq!(
            parse_credentials("xoxc-ABC|x=DEF;"),
            Err(CredentialsError::MalformedCookie)
        );
    }
}
