use std::fmt;

use serde::{Deserialize, Deserializer};

/// Wrapper for secret-bearing values (passwords, tokens, verification links).
///
/// `Debug` and `Display` never print the inner value, so a `Redacted` field can
/// be handed to `tracing` or `{:?}` without leaking it. Reading the secret
/// requires an explicit `expose()`. There is no `Serialize` impl.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Redacted<T>(T);

impl<T> Redacted<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    pub fn expose(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> From<T> for Redacted<T> {
    fn from(value: T) -> Self {
        Self(value)
    }
}

impl<T> fmt::Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T> fmt::Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Redacted<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        T::deserialize(deserializer).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formatting_hides_value() {
        let secret = Redacted::new("hunter22".to_string());
        assert_eq!(format!("{:?}", secret), "[REDACTED]");
        assert_eq!(secret.to_string(), "[REDACTED]");
        assert_eq!(secret.expose(), "hunter22");
    }

    #[test]
    fn deserializes_transparently() {
        #[derive(Deserialize, Debug)]
        struct Body {
            password: Redacted<String>,
        }

        let body: Body = serde_json::from_str(r#"{"password":"Secret123"}"#).unwrap();
        assert_eq!(body.password.expose(), "Secret123");
        assert!(!format!("{:?}", body).contains("Secret123"));
    }
}
