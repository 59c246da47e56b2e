//! HTTP Basic authentication for the metrics endpoint.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use subtle::ConstantTimeEq;

/// `WWW-Authenticate` value sent with a 401.
pub const CHALLENGE: &str = "Basic realm=\"FIBRE Metrics\"";

/// Credentials required to scrape `/metrics`.
///
/// Authentication is only enforced when both a username and a password are
/// configured. With either one missing every request is let through.
#[derive(Clone, Default)]
pub struct MetricsAuth {
    credentials: Option<(String, String)>,
}

impl MetricsAuth {
    pub fn new(username: Option<String>, password: Option<String>) -> Self {
        let credentials = match (username, password) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some((u, p)),
            _ => None,
        };
        Self { credentials }
    }

    /// An authenticator that lets every request through.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.credentials.is_some()
    }

    /// Checks the value of an `Authorization` header.
    pub fn authorize(&self, header: Option<&str>) -> bool {
        let Some((username, password)) = &self.credentials else {
            return true;
        };
        let Some(encoded) = header.and_then(|h| h.strip_prefix("Basic ")) else {
            return false;
        };
        let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
            return false;
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            return false;
        };
        let Some((user, pass)) = decoded.split_once(':') else {
            return false;
        };

        let user_ok = user.as_bytes().ct_eq(username.as_bytes());
        let pass_ok = pass.as_bytes().ct_eq(password.as_bytes());
        (user_ok & pass_ok).into()
    }
}

impl std::fmt::Debug for MetricsAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsAuth")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic(user: &str, pass: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{user}:{pass}")))
    }

    fn auth() -> MetricsAuth {
        MetricsAuth::new(Some("prom".into()), Some("s3cret".into()))
    }

    #[test]
    fn matching_credentials_pass() {
        assert!(auth().authorize(Some(&basic("prom", "s3cret"))));
    }

    #[test]
    fn missing_or_wrong_credentials_fail() {
        let a = auth();
        assert!(!a.authorize(None));
        assert!(!a.authorize(Some(&basic("prom", "wrong"))));
        assert!(!a.authorize(Some(&basic("other", "s3cret"))));
        assert!(!a.authorize(Some("Bearer abc")));
        assert!(!a.authorize(Some("Basic !!!not-base64")));
        assert!(!a.authorize(Some(&format!("Basic {}", STANDARD.encode("no-colon")))));
    }

    #[test]
    fn password_may_contain_colons() {
        let a = MetricsAuth::new(Some("u".into()), Some("a:b".into()));
        assert!(a.authorize(Some(&basic("u", "a:b"))));
    }

    #[test]
    fn half_configured_credentials_disable_auth() {
        let a = MetricsAuth::new(Some("prom".into()), None);
        assert!(!a.is_enabled());
        assert!(a.authorize(None));
        assert!(MetricsAuth::disabled().authorize(None));
    }
}
