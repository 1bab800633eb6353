use crate::classify::to_db_error;
use async_trait::async_trait;
use pgworkload_engine::{ConfigError, Connector, DbError, Session};
use tokio_postgres::{Client, Config, NoTls};
use tracing::{debug, error};

/// Opens PostgreSQL sessions from a parsed connection URL.
#[derive(Debug, Clone)]
pub struct PostgresConnector {
    config: Config,
}

impl PostgresConnector {
    /// Parse a `postgres://` URL. The URL must name a database.
    pub fn from_url(url: &str) -> Result<Self, ConfigError> {
        let config: Config = url
            .parse()
            .map_err(|e: tokio_postgres::Error| ConfigError::Url(e.to_string()))?;
        if config.get_dbname().is_none_or(str::is_empty) {
            return Err(ConfigError::Url(
                "the URL must name a database".to_string(),
            ));
        }
        Ok(Self { config })
    }

    pub fn dbname(&self) -> Option<&str> {
        self.config.get_dbname()
    }

    pub fn application_name(&self) -> Option<&str> {
        self.config.get_application_name()
    }
}

#[async_trait]
impl Connector for PostgresConnector {
    type Session = PgSession;

    async fn connect(&self) -> Result<PgSession, DbError> {
        let (client, connection) = self.config.connect(NoTls).await.map_err(to_db_error)?;

        // Spawn the connection task; it ends once the client is dropped.
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL connection error: {}", e);
            }
        });
        debug!("PostgreSQL session opened");

        Ok(PgSession { client })
    }
}

/// One PostgreSQL connection. Dropping it closes the connection.
pub struct PgSession {
    client: Client,
}

impl PgSession {
    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Session for PgSession {
    async fn begin(&mut self) -> Result<(), DbError> {
        self.client.batch_execute("BEGIN").await.map_err(to_db_error)
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        self.client.batch_execute("COMMIT").await.map_err(to_db_error)
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        self.client.batch_execute("ROLLBACK").await.map_err(to_db_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_must_name_database() {
        assert!(PostgresConnector::from_url("postgres://root@localhost:26257/bank").is_ok());
        assert!(matches!(
            PostgresConnector::from_url("postgres://root@localhost:26257"),
            Err(ConfigError::Url(_))
        ));
        assert!(matches!(
            PostgresConnector::from_url("not a url at all ://"),
            Err(ConfigError::Url(_))
        ));
    }

    #[test]
    fn test_url_parameters_are_kept() {
        let connector = PostgresConnector::from_url(
            "postgres://root@localhost:26257/bank?sslmode=disable&application_name=nightly%20kv",
        )
        .unwrap();
        assert_eq!(connector.dbname(), Some("bank"));
        assert_eq!(connector.application_name(), Some("nightly kv"));
    }
}
