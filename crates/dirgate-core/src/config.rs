//! Configuration for Dirgate

use crate::mapping::{parse_attribute_pairs, AttributeMapping};
use crate::{Error, Result, PROJECTION_PLACEHOLDER};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// SQL drivers the backend can connect with
pub const SUPPORTED_DRIVERS: &[&str] = &["sqlite", "postgres", "mysql"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub tls: TlsConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub directory: DirectoryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl GatewayConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidConfig(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| Error::InvalidConfig(format!("Failed to parse config: {}", e)))
    }

    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Overlay `DIRGATE_*` environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("DIRGATE_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }
        if let Ok(port) = std::env::var("DIRGATE_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| Error::InvalidConfig(format!("Invalid DIRGATE_PORT: {}", port)))?;
        }
        if let Ok(driver) = std::env::var("DIRGATE_DATABASE_DRIVER") {
            self.database.driver = driver;
        }
        if let Ok(url) = std::env::var("DIRGATE_DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(query) = std::env::var("DIRGATE_AUTH_QUERY") {
            self.database.auth_query = query;
        }
        if let Ok(query) = std::env::var("DIRGATE_SEARCH_QUERY") {
            self.database.search_query = query;
        }
        if let Ok(base_dn) = std::env::var("DIRGATE_BASE_DN") {
            self.directory.base_dn = base_dn;
        }
        if let Ok(rdn) = std::env::var("DIRGATE_RDN_ATTRIBUTE") {
            self.directory.rdn_attribute = rdn;
        }
        if let Ok(attributes) = std::env::var("DIRGATE_ATTRIBUTES") {
            self.directory.set_attributes(&attributes)?;
        }
        if let Ok(level) = std::env::var("DIRGATE_LOG_LEVEL") {
            self.logging.level = level;
        }

        // TLS from environment
        if let Ok(cert) = std::env::var("DIRGATE_TLS_CERT") {
            self.tls.enabled = true;
            self.tls.cert_file = Some(PathBuf::from(cert));
        }
        if let Ok(key) = std::env::var("DIRGATE_TLS_KEY") {
            self.tls.key_file = Some(PathBuf::from(key));
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate()?;
        self.directory.validate()?;
        self.tls.validate()
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.server.bind_address, self.server.port)
    }

    pub fn attribute_mapping(&self) -> AttributeMapping {
        self.directory.attribute_mapping()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Maximum number of concurrently served connections
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: crate::DEFAULT_LDAP_PORT,
            max_connections: 1024,
        }
    }
}

/// LDAPS listener configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Enable TLS
    pub enabled: bool,
    /// Path to certificate file (PEM format)
    pub cert_file: Option<PathBuf>,
    /// Path to private key file (PEM format)
    pub key_file: Option<PathBuf>,
    /// Minimum TLS version (1.2 or 1.3)
    pub min_version: TlsVersion,
}

impl TlsConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let cert = self.cert_file.as_ref().ok_or_else(|| {
            Error::InvalidConfig("TLS enabled but cert_file not specified".into())
        })?;
        let key = self.key_file.as_ref().ok_or_else(|| {
            Error::InvalidConfig("TLS enabled but key_file not specified".into())
        })?;

        if !cert.exists() {
            return Err(Error::InvalidConfig(format!(
                "Certificate file not found: {:?}",
                cert
            )));
        }
        if !key.exists() {
            return Err(Error::InvalidConfig(format!("Key file not found: {:?}", key)));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TlsVersion {
    #[default]
    #[serde(rename = "1.2")]
    Tls12,
    #[serde(rename = "1.3")]
    Tls13,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// One of [`SUPPORTED_DRIVERS`]
    pub driver: String,
    /// Connection string, e.g. `postgres://user:pw@host/db` or `sqlite://users.db`
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Upper bound for a single backend query
    pub query_timeout_secs: u64,
    /// Fetches the stored password hash; the username is the only parameter
    pub auth_query: String,
    /// Fetches user attributes; the username is the only parameter.
    /// Either contains `%s` for the column list or returns columns aliased
    /// to LDAP attribute names.
    pub search_query: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: "sqlite".to_string(),
            url: "sqlite://users.db".to_string(),
            max_connections: 16,
            min_connections: 1,
            query_timeout_secs: 10,
            auth_query: String::new(),
            search_query: String::new(),
        }
    }
}

impl DatabaseConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_DRIVERS.contains(&self.driver.as_str()) {
            return Err(Error::InvalidConfig(format!(
                "{} is not one of the supported drivers: {}",
                self.driver,
                SUPPORTED_DRIVERS.join(", ")
            )));
        }

        let scheme = self.url.split(':').next().unwrap_or_default();
        let scheme_matches = match self.driver.as_str() {
            "postgres" => scheme == "postgres" || scheme == "postgresql",
            other => scheme == other,
        };
        if !scheme_matches {
            return Err(Error::InvalidConfig(format!(
                "Connection string does not use the {} driver: {}",
                self.driver, scheme
            )));
        }

        if self.auth_query.trim().is_empty() {
            return Err(Error::InvalidConfig("auth_query is required".into()));
        }
        if self.search_query.trim().is_empty() {
            return Err(Error::InvalidConfig("search_query is required".into()));
        }
        if self.search_query.matches(PROJECTION_PLACEHOLDER).count() > 1 {
            return Err(Error::InvalidConfig(format!(
                "search_query must contain at most one '{}' projection placeholder",
                PROJECTION_PLACEHOLDER
            )));
        }
        if self.max_connections == 0 {
            return Err(Error::InvalidConfig("max_connections must be positive".into()));
        }
        if self.query_timeout_secs == 0 {
            return Err(Error::InvalidConfig("query_timeout_secs must be positive".into()));
        }

        Ok(())
    }
}

/// Attribute table as written in a config file: either a list of attribute
/// names served under their own column names, or an LDAP name -> token table.
/// Both keep the order they were written in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeTable {
    Names(Vec<String>),
    Mapped(AttributePairs),
}

impl Default for AttributeTable {
    fn default() -> Self {
        Self::Mapped(AttributePairs::default())
    }
}

impl AttributeTable {
    pub fn pairs(&self) -> Vec<(String, String)> {
        match self {
            AttributeTable::Names(names) => names.iter().map(|n| (n.clone(), n.clone())).collect(),
            AttributeTable::Mapped(pairs) => pairs.0.clone(),
        }
    }
}

/// `(ldap name, token)` pairs read from a TOML table in document order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributePairs(pub Vec<(String, String)>);

impl Serialize for AttributePairs {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, token) in &self.0 {
            map.serialize_entry(name, token)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for AttributePairs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct PairsVisitor;

        impl<'de> Visitor<'de> for PairsVisitor {
            type Value = AttributePairs;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a table of LDAP attribute names to backend tokens")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
                let mut pairs = Vec::new();
                while let Some(pair) = access.next_entry::<String, String>()? {
                    pairs.push(pair);
                }
                Ok(AttributePairs(pairs))
            }
        }

        deserializer.deserialize_map(PairsVisitor)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Subtree all user entries live under, e.g. `ou=People,dc=example,dc=com`
    pub base_dn: String,
    /// Attribute naming user entries, e.g. `cn` or `uid`
    pub rdn_attribute: String,
    pub attributes: AttributeTable,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            base_dn: String::new(),
            rdn_attribute: "cn".to_string(),
            attributes: AttributeTable::default(),
        }
    }
}

impl DirectoryConfig {
    /// Replace the attribute table from `ldap:token,...` notation
    pub fn set_attributes(&mut self, value: &str) -> Result<()> {
        let pairs = parse_attribute_pairs(value)?;
        self.attributes = AttributeTable::Mapped(AttributePairs(pairs));
        Ok(())
    }

    pub fn attribute_mapping(&self) -> AttributeMapping {
        AttributeMapping::new(
            self.base_dn.clone(),
            self.rdn_attribute.clone(),
            self.attributes.pairs(),
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_dn.trim().is_empty() {
            return Err(Error::InvalidConfig("base_dn is required".into()));
        }
        if self.rdn_attribute.trim().is_empty() {
            return Err(Error::InvalidConfig("rdn_attribute is required".into()));
        }
        if self.rdn_attribute.contains(['=', ',']) {
            return Err(Error::InvalidConfig(format!(
                "Invalid rdn_attribute: {}",
                self.rdn_attribute
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
