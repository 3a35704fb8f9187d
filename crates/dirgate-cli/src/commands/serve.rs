//! serve command - run the LDAP gateway

use anyhow::{Context, Result};
use clap::Args;
use dirgate_backend::SqlBackend;
use dirgate_core::config::GatewayConfig;
use dirgate_server::{Frontend, GatewayServer};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Flags overriding the configuration file and environment
#[derive(Debug, Default, Args)]
pub struct ServeArgs {
    /// Bind address
    #[arg(long)]
    pub bind: Option<String>,

    /// Port number
    #[arg(short, long)]
    pub port: Option<u16>,

    /// SQL driver (sqlite, postgres, mysql)
    #[arg(long)]
    pub driver: Option<String>,

    /// Database connection string
    #[arg(long)]
    pub conn: Option<String>,

    /// Query returning the stored password hash for a user
    #[arg(long)]
    pub auth_query: Option<String>,

    /// Query returning user attributes; may contain %s for the column list
    #[arg(long)]
    pub search_query: Option<String>,

    /// Base DN all user entries live under
    #[arg(long)]
    pub base_dn: Option<String>,

    /// RDN attribute of user entries
    #[arg(long)]
    pub rdn: Option<String>,

    /// Attribute table as ldap:column pairs, e.g. mail:email,sn:last_name
    #[arg(long)]
    pub attributes: Option<String>,

    /// TLS certificate (PEM); enables LDAPS
    #[arg(long)]
    pub cert: Option<PathBuf>,

    /// TLS private key (PEM)
    #[arg(long)]
    pub key: Option<PathBuf>,
}

impl ServeArgs {
    /// Apply the flags that were given on top of `config`
    pub fn apply(self, config: &mut GatewayConfig) -> Result<()> {
        if let Some(bind) = self.bind {
            config.server.bind_address = bind;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(driver) = self.driver {
            config.database.driver = driver;
        }
        if let Some(conn) = self.conn {
            config.database.url = conn;
        }
        if let Some(query) = self.auth_query {
            config.database.auth_query = query;
        }
        if let Some(query) = self.search_query {
            config.database.search_query = query;
        }
        if let Some(base_dn) = self.base_dn {
            config.directory.base_dn = base_dn;
        }
        if let Some(rdn) = self.rdn {
            config.directory.rdn_attribute = rdn;
        }
        if let Some(attributes) = self.attributes {
            config.directory.set_attributes(&attributes)?;
        }
        if let Some(cert) = self.cert {
            config.tls.enabled = true;
            config.tls.cert_file = Some(cert);
        }
        if let Some(key) = self.key {
            config.tls.key_file = Some(key);
        }

        Ok(())
    }
}

pub async fn execute(mut config: GatewayConfig, args: ServeArgs) -> Result<()> {
    args.apply(&mut config)?;
    config.validate().context("Invalid configuration")?;

    info!("Starting Dirgate {}", dirgate_core::VERSION);
    info!("Database driver: {}", config.database.driver);

    let mapping = Arc::new(config.attribute_mapping());
    let backend = SqlBackend::connect(&config.database, mapping.clone())
        .await
        .context("Unable to connect to the user database")?;
    let backend = Arc::new(backend);

    let frontend = Frontend::new(mapping, backend.clone());
    let server = GatewayServer::bind(&config, frontend)
        .await
        .with_context(|| format!("Unable to listen on {}", config.listen_address()))?;

    server.run_until(shutdown_signal()).await?;

    backend.close().await;
    info!("Dirgate stopped");

    Ok(())
}

/// Waits for Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let mut config = GatewayConfig::default();
        config.directory.rdn_attribute = "uid".to_string();

        let args = ServeArgs {
            port: Some(10389),
            conn: Some("postgres://dirgate@localhost/users".to_string()),
            driver: Some("postgres".to_string()),
            attributes: Some("mail:email,sn".to_string()),
            cert: Some(PathBuf::from("/etc/dirgate/cert.pem")),
            ..Default::default()
        };
        args.apply(&mut config).unwrap();

        assert_eq!(config.server.port, 10389);
        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert_eq!(config.database.driver, "postgres");
        assert_eq!(config.database.url, "postgres://dirgate@localhost/users");
        assert_eq!(config.directory.rdn_attribute, "uid");
        assert!(config.tls.enabled);

        let mapping = config.attribute_mapping();
        assert_eq!(mapping.token_for("mail"), "email");
        assert_eq!(mapping.token_for("sn"), "sn");
    }

    #[test]
    fn test_bad_attribute_flag_is_rejected() {
        let mut config = GatewayConfig::default();
        let args = ServeArgs {
            attributes: Some("a:b:c".to_string()),
            ..Default::default()
        };

        let err = args.apply(&mut config).unwrap_err();
        assert_eq!(err.to_string(), "not a key value pair: a:b:c");
    }
}
