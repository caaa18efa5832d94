use crate::error::ConfigError;

#[derive(serde::Deserialize, Clone, Debug)]
pub struct Settings {
    pub application: ApplicationSettings,
    /// Postgres backend. When absent the in-memory stores are used.
    pub database: Option<DatabaseSettings>,
    pub jwt: JwtSettings,
    pub lockout: LockoutSettings,
    pub password: PasswordSettings,
    pub sessions: SessionSettings,
    pub revocation: RevocationSettings,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub database_name: String,
    pub max_connections: u32,
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name
        )
    }
}

/// Token signing settings. Access and refresh tokens use distinct secrets.
#[derive(serde::Deserialize, Clone)]
pub struct JwtSettings {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_token_expiry: i64,   // seconds (e.g., 900 for 15 minutes)
    pub refresh_token_expiry: i64,  // seconds (e.g., 604800 for 7 days)
    pub issuer: String,
}

const MIN_SECRET_LENGTH: usize = 32;

impl JwtSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_secret.len() < MIN_SECRET_LENGTH {
            return Err(ConfigError::InvalidValue(format!(
                "jwt.access_secret must be at least {} bytes",
                MIN_SECRET_LENGTH
            )));
        }
        if self.refresh_secret.len() < MIN_SECRET_LENGTH {
            return Err(ConfigError::InvalidValue(format!(
                "jwt.refresh_secret must be at least {} bytes",
                MIN_SECRET_LENGTH
            )));
        }
        if self.access_secret == self.refresh_secret {
            return Err(ConfigError::InvalidValue(
                "jwt.access_secret and jwt.refresh_secret must differ".to_string(),
            ));
        }
        if self.access_token_expiry <= 0 || self.refresh_token_expiry <= 0 {
            return Err(ConfigError::InvalidValue(
                "token expiry must be positive".to_string(),
            ));
        }
        if self.issuer.trim().is_empty() {
            return Err(ConfigError::MissingRequired("jwt.issuer".to_string()));
        }
        Ok(())
    }
}

// Secrets stay out of debug output.
impl std::fmt::Debug for JwtSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtSettings")
            .field("access_token_expiry", &self.access_token_expiry)
            .field("refresh_token_expiry", &self.refresh_token_expiry)
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct LockoutSettings {
    pub max_failed_attempts: u32,
    pub lock_duration: i64, // seconds
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct PasswordSettings {
    /// bcrypt cost factor
    pub cost: u32,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct SessionSettings {
    /// Live refresh tokens kept per account; the oldest are evicted first.
    pub max_refresh_tokens: usize,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct RevocationSettings {
    pub sweep_interval: u64,   // seconds
    pub retention_margin: i64, // seconds kept past a token's own expiry
}

impl Settings {
    /// Every section at its default, with the given signing settings.
    pub fn with_jwt(jwt: JwtSettings) -> Self {
        Self {
            application: ApplicationSettings::default(),
            database: None,
            jwt,
            lockout: LockoutSettings::default(),
            password: PasswordSettings::default(),
            sessions: SessionSettings::default(),
            revocation: RevocationSettings::default(),
        }
    }
}

impl JwtSettings {
    pub fn new(access_secret: impl Into<String>, refresh_secret: impl Into<String>) -> Self {
        Self {
            access_secret: access_secret.into(),
            refresh_secret: refresh_secret.into(),
            access_token_expiry: 900,
            refresh_token_expiry: 604_800,
            issuer: "keyward".to_string(),
        }
    }
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Default for LockoutSettings {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            lock_duration: 900,
        }
    }
}

impl Default for PasswordSettings {
    fn default() -> Self {
        Self { cost: 12 }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_refresh_tokens: 10,
        }
    }
}

impl Default for RevocationSettings {
    fn default() -> Self {
        Self {
            sweep_interval: 300,
            retention_margin: 60,
        }
    }
}

pub fn get_configuration() -> Result<Settings, ConfigError> {
    let settings = config::Config::builder()
        .set_default("application.host", "127.0.0.1")
        .and_then(|b| b.set_default("application.port", 8080))
        .and_then(|b| b.set_default("jwt.access_token_expiry", 900))
        .and_then(|b| b.set_default("jwt.refresh_token_expiry", 604_800))
        .and_then(|b| b.set_default("jwt.issuer", "keyward"))
        .and_then(|b| b.set_default("lockout.max_failed_attempts", 5))
        .and_then(|b| b.set_default("lockout.lock_duration", 900))
        .and_then(|b| b.set_default("password.cost", 12))
        .and_then(|b| b.set_default("sessions.max_refresh_tokens", 10))
        .and_then(|b| b.set_default("revocation.sweep_interval", 300))
        .and_then(|b| b.set_default("revocation.retention_margin", 60))
        .map_err(|e| ConfigError::ParseError(e.to_string()))?
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    let settings = settings
        .try_deserialize::<Settings>()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;
    settings.jwt.validate()?;
    Ok(settings)
}
