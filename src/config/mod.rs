use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub app: AppSettings,
    pub backend: BackendConfig,
    pub session: SessionConfig,
    pub security: SecurityConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    pub name: String,
    pub version: String,
    pub url: String,
    pub debug: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Hosted Postgres behind a REST query layer plus its auth API
    Rest,
    /// Direct Postgres with a local users table
    Sql,
    /// Process memory, for demos and tests
    Memory,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub url: String,
    pub anon_key: String,
    /// Never attached to data requests.
    pub service_key: Option<String>,
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStoreKind {
    Memory,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub store: SessionStoreKind,
    pub dir: String,
    pub cookie_name: String,
    pub timeout_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub csrf_token_name: String,
    pub login_attempts_limit: u32,
    pub login_lockout_secs: i64,
    pub secure_cookies: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
}

// Keys stay out of logs
impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("kind", &self.kind)
            .field("url", &self.url)
            .field("anon_key", &if self.anon_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("service_key", &self.service_key.as_ref().map(|_| "<redacted>"))
            .field("database_url", &self.database_url.as_ref().map(|_| "<redacted>"))
            .field("max_connections", &self.max_connections)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = match lookup("APP_ENV").as_deref() {
            Some("production") | Some("prod") => Environment::Production,
            Some("staging") | Some("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides(&lookup)
    }

    fn with_env_overrides<F>(mut self, lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        // Application overrides
        if let Some(v) = lookup("APP_NAME") {
            self.app.name = v;
        }
        if let Some(v) = lookup("APP_DEBUG") {
            self.app.debug = v.parse().unwrap_or(self.app.debug);
        }
        if let Some(v) = lookup("APP_URL") {
            self.app.url = v.trim_end_matches('/').to_string();
        }

        // Backend overrides
        if let Some(v) = lookup("SUPABASE_URL").filter(|v| !v.is_empty()) {
            self.backend.url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = lookup("SUPABASE_ANON_KEY") {
            self.backend.anon_key = v;
        }
        self.backend.service_key = lookup("SUPABASE_SERVICE_ROLE_KEY").filter(|v| !v.is_empty());
        self.backend.database_url = lookup("DATABASE_URL").filter(|v| !v.is_empty());
        self.backend.kind = match lookup("TICKETA_BACKEND").as_deref() {
            Some("rest") => BackendKind::Rest,
            Some("sql") => BackendKind::Sql,
            Some("memory") => BackendKind::Memory,
            _ if !self.backend.url.is_empty() => BackendKind::Rest,
            _ if self.backend.database_url.is_some() => BackendKind::Sql,
            _ => BackendKind::Memory,
        };
        if let Some(v) = lookup("DATABASE_MAX_CONNECTIONS") {
            self.backend.max_connections = v.parse().unwrap_or(self.backend.max_connections);
        }
        if let Some(v) = lookup("BACKEND_TIMEOUT_SECS") {
            self.backend.timeout_secs = v.parse().unwrap_or(self.backend.timeout_secs);
        }

        // Session overrides
        match lookup("SESSION_STORE").as_deref() {
            Some("file") => self.session.store = SessionStoreKind::File,
            Some("memory") => self.session.store = SessionStoreKind::Memory,
            _ => {}
        }
        if let Some(v) = lookup("SESSION_DIR") {
            self.session.dir = v;
        }
        if let Some(v) = lookup("SESSION_TIMEOUT") {
            self.session.timeout_secs = v.parse().unwrap_or(self.session.timeout_secs);
        }

        // Security overrides
        if let Some(v) = lookup("LOGIN_ATTEMPTS_LIMIT") {
            self.security.login_attempts_limit = v.parse().unwrap_or(self.security.login_attempts_limit);
        }
        if let Some(v) = lookup("LOGIN_LOCKOUT_TIME") {
            self.security.login_lockout_secs = v.parse().unwrap_or(self.security.login_lockout_secs);
        }
        self.security.secure_cookies = match lookup("SECURITY_SECURE_COOKIES") {
            Some(v) => v.parse().unwrap_or(self.security.secure_cookies),
            None => self.security.secure_cookies || self.app.url.starts_with("https://"),
        };

        // Server overrides
        if let Some(port) = lookup("TICKETA_PORT").or_else(|| lookup("PORT")).and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }

        self
    }

    fn base(environment: Environment) -> Self {
        Self {
            environment,
            app: AppSettings {
                name: "Ticketa".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                url: "http://localhost:8000".to_string(),
                debug: false,
            },
            backend: BackendConfig {
                kind: BackendKind::Memory,
                url: String::new(),
                anon_key: String::new(),
                service_key: None,
                database_url: None,
                max_connections: 10,
                timeout_secs: 15,
            },
            session: SessionConfig {
                store: SessionStoreKind::Memory,
                dir: "storage/sessions".to_string(),
                cookie_name: "ticketa_session".to_string(),
                timeout_secs: 3600,
            },
            security: SecurityConfig {
                csrf_token_name: "_token".to_string(),
                login_attempts_limit: 5,
                login_lockout_secs: 900,
                secure_cookies: false,
            },
            server: ServerConfig { port: 8000 },
        }
    }

    fn development() -> Self {
        let mut config = Self::base(Environment::Development);
        config.app.debug = true;
        config
    }

    fn staging() -> Self {
        let mut config = Self::base(Environment::Staging);
        config.session.store = SessionStoreKind::File;
        config.backend.timeout_secs = 10;
        config.security.secure_cookies = true;
        config
    }

    fn production() -> Self {
        let mut config = Self::base(Environment::Production);
        config.session.store = SessionStoreKind::File;
        config.backend.max_connections = 50;
        config.backend.timeout_secs = 10;
        config.security.secure_cookies = true;
        config
    }

    pub fn is_production(&self) -> bool {
        matches!(self.environment, Environment::Production)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_development_config() {
        let config = config_from(&[]);
        assert_eq!(config.environment, Environment::Development);
        assert!(config.app.debug);
        assert_eq!(config.app.name, "Ticketa");
        assert_eq!(config.backend.kind, BackendKind::Memory);
        assert_eq!(config.session.timeout_secs, 3600);
        assert_eq!(config.security.login_attempts_limit, 5);
        assert_eq!(config.security.login_lockout_secs, 900);
        assert_eq!(config.security.csrf_token_name, "_token");
    }

    #[test]
    fn test_default_production_config() {
        let config = config_from(&[("APP_ENV", "production")]);
        assert!(config.is_production());
        assert!(!config.app.debug);
        assert!(config.security.secure_cookies);
        assert_eq!(config.session.store, SessionStoreKind::File);
    }

    #[test]
    fn backend_kind_follows_configured_urls() {
        let rest = config_from(&[("SUPABASE_URL", "https://abc.supabase.co/"), ("SUPABASE_ANON_KEY", "anon")]);
        assert_eq!(rest.backend.kind, BackendKind::Rest);
        assert_eq!(rest.backend.url, "https://abc.supabase.co");

        let sql = config_from(&[("DATABASE_URL", "postgres://localhost/ticketa")]);
        assert_eq!(sql.backend.kind, BackendKind::Sql);

        let forced = config_from(&[("SUPABASE_URL", "https://abc.supabase.co"), ("TICKETA_BACKEND", "memory")]);
        assert_eq!(forced.backend.kind, BackendKind::Memory);
    }

    #[test]
    fn overrides_are_parsed_and_bad_values_ignored() {
        let config = config_from(&[
            ("APP_DEBUG", "false"),
            ("LOGIN_ATTEMPTS_LIMIT", "3"),
            ("SESSION_TIMEOUT", "not-a-number"),
            ("PORT", "9090"),
            ("APP_URL", "https://tickets.example.com"),
        ]);
        assert!(!config.app.debug);
        assert_eq!(config.security.login_attempts_limit, 3);
        assert_eq!(config.session.timeout_secs, 3600);
        assert_eq!(config.server.port, 9090);
        assert!(config.security.secure_cookies);
    }

    #[test]
    fn debug_output_redacts_keys() {
        let config = config_from(&[("SUPABASE_URL", "https://abc.supabase.co"), ("SUPABASE_ANON_KEY", "secret-anon")]);
        let printed = format!("{:?}", config.backend);
        assert!(!printed.contains("secret-anon"));
        assert!(printed.contains("<redacted>"));
    }
}
