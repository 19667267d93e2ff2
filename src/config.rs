use crate::core::db::{
    ConnectionDescriptor, FunctionCatalog, Procedure, ProcedureCatalog, SqliteConnector, StoredFunction, DEFAULT_PORT,
};
use crate::core::{ConsoleError, Result};
use crate::gateway::Role;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration structure parsed from a TOML file.
#[derive(Debug, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub sqlite: SqliteConfig,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    #[serde(default)]
    pub procedures: Vec<ProcedureConfig>,
    #[serde(default)]
    pub functions: Vec<FunctionConfig>,
    /// Directory relative paths are resolved against
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Connection parameters the console hands to the gateway.
#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub secret: String,
    pub name: String,
}

/// Embedded driver settings.
#[derive(Debug, Default, Deserialize)]
pub struct SqliteConfig {
    pub data_dir: Option<PathBuf>,
    pub busy_timeout_ms: Option<u64>,
    pub allowed_hosts: Option<Vec<String>>,
    pub username: Option<String>,
    pub secret: Option<String>,
}

/// A console login.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub username: String,
    pub secret: String,
    pub role: Role,
}

/// A stored procedure for the embedded driver.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcedureConfig {
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
    pub body: Vec<String>,
}

/// A stored function for the embedded driver: one query whose first value is the result.
#[derive(Debug, Clone, Deserialize)]
pub struct FunctionConfig {
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
    pub body: String,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_username() -> String {
    "root".to_string()
}

impl DatabaseConfig {
    pub fn descriptor(&self) -> ConnectionDescriptor {
        ConnectionDescriptor::new(&self.host, self.port, &self.username, &self.secret, &self.name)
    }
}

impl Config {
    /// Parses configuration text; relative paths resolve against `base_dir`.
    pub fn from_toml(content: &str, base_dir: impl Into<PathBuf>) -> Result<Config> {
        let mut config: Config = toml::from_str(content)?;
        config.base_dir = base_dir.into();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        match (&self.sqlite.username, &self.sqlite.secret) {
            (Some(_), None) | (None, Some(_)) => {
                return Err(ConsoleError::Config(
                    "[sqlite] username and secret must be given together".to_string(),
                ))
            }
            _ => {}
        }
        for procedure in &self.procedures {
            if procedure.name.trim().is_empty() {
                return Err(ConsoleError::Config("procedure with an empty name".to_string()));
            }
            if procedure.body.is_empty() {
                return Err(ConsoleError::Config(format!(
                    "procedure '{}' has an empty body",
                    procedure.name
                )));
            }
        }
        for function in &self.functions {
            if function.name.trim().is_empty() {
                return Err(ConsoleError::Config("function with an empty name".to_string()));
            }
            if function.body.trim().is_empty() {
                return Err(ConsoleError::Config(format!(
                    "function '{}' has an empty body",
                    function.name
                )));
            }
        }
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        let dir = self
            .sqlite
            .data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("data"));
        if dir.is_absolute() {
            dir
        } else {
            self.base_dir.join(dir)
        }
    }

    pub fn procedure_catalog(&self) -> ProcedureCatalog {
        self.procedures
            .iter()
            .map(|p| Procedure::new(&p.name, p.params.clone(), p.body.clone()))
            .collect()
    }

    pub fn function_catalog(&self) -> FunctionCatalog {
        self.functions
            .iter()
            .map(|f| StoredFunction::new(&f.name, f.params.clone(), &f.body))
            .collect()
    }

    /// Builds the embedded driver described by `[sqlite]`, `[[procedures]]` and `[[functions]]`.
    pub fn connector(&self) -> SqliteConnector {
        let mut connector = SqliteConnector::new(self.data_dir())
            .with_procedures(self.procedure_catalog())
            .with_functions(self.function_catalog());
        if let Some(ms) = self.sqlite.busy_timeout_ms {
            connector = connector.with_busy_timeout(Duration::from_millis(ms));
        }
        for host in self.sqlite.allowed_hosts.iter().flatten() {
            connector = connector.with_allowed_host(host);
        }
        if let (Some(user), Some(secret)) = (&self.sqlite.username, &self.sqlite.secret) {
            connector = connector.with_credentials(user, secret);
        }
        connector
    }
}

/// Loads configuration from a TOML file at the given path.
///
/// # Arguments
///
/// * `path` - The file path to the TOML configuration file.
///
/// # Example
///
/// ```no_run
/// let config = marketgate::config::load_config("marketgate.toml").expect("Failed to load config");
/// println!("{:?}", config.database.name);
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .map_err(|e| ConsoleError::Config(format!("cannot read {}: {}", path.display(), e)))?;
    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    Config::from_toml(&content, base_dir)
}

/// `<config dir>/marketgate/config.toml`, when the platform has a config directory.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("marketgate").join("config.toml"))
}
