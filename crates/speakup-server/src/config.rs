use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use speakup_types::Redacted;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "your_jwt_secret",
    "secret",
];

#[derive(Debug)]
pub struct Config {
    pub jwt_secret: Redacted<String>,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub frontend_url: String,
    pub mail_relay_url: Option<String>,
    pub development: bool,
    pub admin_emails: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| var(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let jwt_secret = get("SPEAKUP_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("SPEAKUP_JWT_SECRET is unset or still a placeholder");
        }

        let port = match get("SPEAKUP_PORT") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("SPEAKUP_PORT is not a port number: {}", raw))?,
            None => 5000,
        };

        let admin_emails = get("SPEAKUP_ADMIN_EMAILS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            jwt_secret: Redacted::new(jwt_secret),
            db_path: get("SPEAKUP_DB_PATH").unwrap_or_else(|| "speakup.db".into()).into(),
            host: get("SPEAKUP_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            upload_dir: get("SPEAKUP_UPLOAD_DIR").unwrap_or_else(|| "./uploads".into()).into(),
            frontend_url: get("SPEAKUP_FRONTEND_URL")
                .unwrap_or_else(|| "http://localhost:3000".into()),
            mail_relay_url: get("SPEAKUP_MAIL_RELAY_URL"),
            development: get("SPEAKUP_ENV")
                .is_some_and(|env| env.eq_ignore_ascii_case("development")),
            admin_emails,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn rejects_missing_or_placeholder_secret() {
        assert!(load(&[]).is_err());
        assert!(load(&[("SPEAKUP_JWT_SECRET", "dev-secret-change-me")]).is_err());
        assert!(load(&[("SPEAKUP_JWT_SECRET", "   ")]).is_err());
    }

    #[test]
    fn defaults() {
        let config = load(&[("SPEAKUP_JWT_SECRET", "a-real-secret")]).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.db_path, PathBuf::from("speakup.db"));
        assert_eq!(config.frontend_url, "http://localhost:3000");
        assert!(config.mail_relay_url.is_none());
        assert!(!config.development);
        assert!(config.admin_emails.is_empty());
        assert_eq!(format!("{:?}", config.jwt_secret), "[REDACTED]");
    }

    #[test]
    fn parses_overrides() {
        let config = load(&[
            ("SPEAKUP_JWT_SECRET", "a-real-secret"),
            ("SPEAKUP_PORT", "8080"),
            ("SPEAKUP_ENV", "production"),
            ("SPEAKUP_ADMIN_EMAILS", "a@x.com, ,b@x.com"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert!(!config.development);
        assert_eq!(config.admin_emails, vec!["a@x.com", "b@x.com"]);

        let dev = load(&[
            ("SPEAKUP_JWT_SECRET", "a-real-secret"),
            ("SPEAKUP_ENV", "Development"),
        ])
        .unwrap();
        assert!(dev.development);

        assert!(load(&[("SPEAKUP_JWT_SECRET", "s3"), ("SPEAKUP_PORT", "http")]).is_err());
    }
}
