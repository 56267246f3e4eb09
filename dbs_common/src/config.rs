//! Server configuration.

use std::{env, fs, str::FromStr, time::Duration};

use crate::ids::IdStrategy;
use crate::prelude::*;

/// Our top-level configuration, usually loaded from a YAML or JSON file.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// How to reach the database.
    pub database: DatabaseConfig,
    /// How to check clients.
    #[serde(default)]
    pub auth: AuthConfig,
}

fn default_port() -> u16 {
    8310
}

/// Database settings.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Which kind of database to use.
    pub backend: Backend,
    /// The connection URL, or path for SQLite. Overridden by `DATABASE_URL`.
    #[serde(default)]
    pub url: Option<String>,
    /// The maximum number of pooled connections.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    /// How long to wait for a pooled connection.
    #[serde(default = "default_connection_timeout", with = "humantime_serde")]
    pub connection_timeout: Duration,
    /// How long a SQLite writer waits for another writer to finish.
    #[serde(default = "default_busy_timeout", with = "humantime_serde")]
    pub busy_timeout: Duration,
    /// How to assign surrogate ids. Defaults to what `backend` does best.
    #[serde(default)]
    pub id_strategy: Option<IdStrategy>,
    /// Keep retrying if the database isn't up yet?
    #[serde(default)]
    pub retry_connection: bool,
}

fn default_pool_size() -> u32 {
    16
}

fn default_connection_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_busy_timeout() -> Duration {
    Duration::from_secs(5)
}

impl DatabaseConfig {
    /// The URL to connect to.
    pub fn url(&self) -> Result<String> {
        self.url.clone().ok_or_else(|| {
            DbsError::validation("no database url configured", "dbs.config.url").into()
        })
    }

    /// The surrogate id strategy to use.
    pub fn id_strategy(&self) -> IdStrategy {
        self.id_strategy
            .unwrap_or_else(|| IdStrategy::default_for(self.backend))
    }

    fn validate(&self) -> Result<()> {
        const ORIGIN: &str = "dbs.config.validate";
        if !self.id_strategy().is_supported_by(self.backend) {
            return Err(DbsError::validation(
                format!("{} does not support sequences", self.backend),
                ORIGIN,
            )
            .into());
        }
        if self.pool_size == 0 {
            return Err(DbsError::validation("pool_size must be positive", ORIGIN).into());
        }
        Ok(())
    }
}

/// Client authentication settings.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// If set, clients must send this as their basic auth password.
    #[serde(default)]
    pub password: Option<String>,
}

impl Config {
    /// Load our configuration from `path`, letting `DATABASE_URL` override
    /// the configured database URL.
    pub fn load(path: &Path) -> Result<Config> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("could not read {}", path.display()))?;
        let mut config = text
            .parse::<Config>()
            .with_context(|| format!("could not load {}", path.display()))?;
        if let Ok(url) = env::var("DATABASE_URL") {
            debug!("using DATABASE_URL from the environment");
            config.database.url = Some(url);
        }
        config.database.url()?;
        Ok(config)
    }
}

impl FromStr for Config {
    type Err = Error;

    /// Parse YAML (or JSON, which is also YAML) configuration.
    fn from_str(s: &str) -> Result<Config> {
        let config: Config = serde_yaml::from_str(s).with_context(|| {
            DbsError::decode("could not parse configuration", "dbs.config.parse")
        })?;
        config.database.validate()?;
        Ok(config)
    }
}
