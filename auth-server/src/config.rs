//! Server Configuration
//!
//! Loaded from an optional `auth-server.toml` file and `AUTH_*` environment
//! variables (a `.env` file is read first when present).

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use zk_auth_verifier::{ConfiguredSchemas, DecodeError, IssuerStateSource, SchemaHash, SchemaRef};

/// File name (without extension) searched in the working directory
pub const CONFIG_FILE: &str = "auth-server";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "AUTH";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid socket address {0:?}")]
    InvalidAddress(String),
    #[error("invalid state contract address {0:?}: expected 0x followed by 20 hex bytes")]
    InvalidContract(String),
    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),
    #[error("invalid hash for schema {schema}: {source}")]
    InvalidSchemaHash {
        schema: String,
        #[source]
        source: DecodeError,
    },
}

/// One entry of the claim schema table
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaEntry {
    pub url: String,
    #[serde(rename = "type")]
    pub schema_type: String,
    /// Hex-encoded 16-byte schema hash
    pub hash: String,
}

impl SchemaEntry {
    pub fn schema_ref(&self) -> SchemaRef {
        SchemaRef {
            url: self.url.clone(),
            schema_type: self.schema_type.clone(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// CORS allowed origins
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Ethereum JSON-RPC endpoint hosting the state contract
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// State contract address
    #[serde(default = "default_state_contract")]
    pub state_contract: String,

    /// Per-request timeout for JSON-RPC calls
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,

    /// Upper bound on a single state-registry read
    #[serde(default = "default_resolution_timeout")]
    pub resolution_timeout_secs: u64,

    /// Directory holding `<circuitId>.json` verification keys
    #[serde(default = "default_circuits_dir")]
    pub circuits_dir: PathBuf,

    /// Relying-party identifier checked by the `audience` rule
    pub audience: Option<String>,

    #[serde(default)]
    pub issuer_state_source: IssuerStateSource,

    /// Reconcile claimed states with the registry. Disable only for offline testing.
    #[serde(default = "default_check_states")]
    pub check_states: bool,

    /// Claim schemas accepted by the `schema` rule
    #[serde(default)]
    pub schemas: Vec<SchemaEntry>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_rpc_url() -> String {
    "http://localhost:8545".to_string()
}

fn default_state_contract() -> String {
    "0x0000000000000000000000000000000000000000".to_string()
}

fn default_rpc_timeout() -> u64 {
    5
}

fn default_resolution_timeout() -> u64 {
    10
}

fn default_check_states() -> bool {
    true
}

fn default_circuits_dir() -> PathBuf {
    PathBuf::from("circuits")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            json_logs: false,
            cors_origins: default_cors_origins(),
            rpc_url: default_rpc_url(),
            state_contract: default_state_contract(),
            rpc_timeout_secs: default_rpc_timeout(),
            resolution_timeout_secs: default_resolution_timeout(),
            circuits_dir: default_circuits_dir(),
            audience: None,
            issuer_state_source: IssuerStateSource::default(),
            check_states: default_check_states(),
            schemas: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from `auth-server.toml` and the environment
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let settings = config::Config::builder()
            .add_source(config::File::with_name(CONFIG_FILE).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("cors_origins"),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;
        self.state_contract_bytes()?;
        if self.rpc_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout("rpc_timeout_secs"));
        }
        if self.resolution_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout("resolution_timeout_secs"));
        }
        self.schema_table()?;
        Ok(())
    }

    /// Schema table for the query evaluator
    pub fn schema_table(&self) -> Result<ConfiguredSchemas, ConfigError> {
        self.schemas
            .iter()
            .map(|entry| {
                let schema = entry.schema_ref();
                SchemaHash::from_hex(&entry.hash)
                    .map(|hash| (schema.clone(), hash))
                    .map_err(|source| ConfigError::InvalidSchemaHash {
                        schema: schema.to_string(),
                        source,
                    })
            })
            .collect()
    }

    /// Get socket address for binding
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse().map_err(|_| ConfigError::InvalidAddress(addr))
    }

    /// Decoded state contract address
    pub fn state_contract_bytes(&self) -> Result<[u8; 20], ConfigError> {
        let invalid = || ConfigError::InvalidContract(self.state_contract.clone());
        let hex_part = self.state_contract.strip_prefix("0x").ok_or_else(invalid)?;
        let bytes = hex::decode(hex_part).map_err(|_| invalid())?;
        bytes.try_into().map_err(|_| invalid())
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn resolution_timeout(&self) -> Duration {
        Duration::from_secs(self.resolution_timeout_secs)
    }
}
