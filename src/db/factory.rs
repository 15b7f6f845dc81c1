// Client Factory
// Keeps one driver per database type and opens clients through it

use crate::db::config::DatabaseConfig;
use crate::db::traits::{DatabaseClient, DatabaseDriver, DatabaseError, DatabaseType, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Factory for creating database clients
pub struct ClientFactory {
    drivers: RwLock<HashMap<DatabaseType, Arc<dyn DatabaseDriver>>>,
}

impl ClientFactory {
    /// Create a factory with no drivers registered
    pub fn new() -> Self {
        Self {
            drivers: RwLock::new(HashMap::new()),
        }
    }

    /// Create a factory with every driver compiled into this build
    pub fn with_default_drivers() -> Self {
        let mut drivers: HashMap<DatabaseType, Arc<dyn DatabaseDriver>> = HashMap::new();
        for driver in crate::db::drivers::default_drivers() {
            drivers.insert(driver.database_type(), driver);
        }
        Self {
            drivers: RwLock::new(drivers),
        }
    }

    /// Register a database driver, replacing any previous one for the same type
    pub async fn register(&self, driver: Arc<dyn DatabaseDriver>) {
        let db_type = driver.database_type();
        let mut drivers = self.drivers.write().await;
        drivers.insert(db_type, driver);
        tracing::debug!(database_type = %db_type, "Registered driver");
    }

    /// Remove a driver
    pub async fn unregister(&self, db_type: DatabaseType) {
        let mut drivers = self.drivers.write().await;
        drivers.remove(&db_type);
        tracing::debug!(database_type = %db_type, "Unregistered driver");
    }

    /// Get a driver by database type
    pub async fn get_driver(&self, db_type: DatabaseType) -> Result<Arc<dyn DatabaseDriver>> {
        let drivers = self.drivers.read().await;
        drivers.get(&db_type).cloned().ok_or_else(|| {
            DatabaseError::UnsupportedDatabase(format!(
                "{} (no driver registered in this build)",
                db_type.display_name()
            ))
        })
    }

    /// Get all registered database types, sorted
    pub async fn supported_types(&self) -> Vec<DatabaseType> {
        let drivers = self.drivers.read().await;
        let mut types: Vec<DatabaseType> = drivers.keys().copied().collect();
        types.sort();
        types
    }

    pub async fn has_driver(&self, db_type: DatabaseType) -> bool {
        let drivers = self.drivers.read().await;
        drivers.contains_key(&db_type)
    }

    /// Open a client of the given type. This is the only place a connection is established.
    pub async fn create(
        &self,
        db_type: DatabaseType,
        config: &DatabaseConfig,
    ) -> Result<Box<dyn DatabaseClient>> {
        let driver = self.get_driver(db_type).await?;

        if config.database_type != db_type {
            return Err(DatabaseError::Configuration(format!(
                "Configuration is for {} but {} was requested",
                config.database_type.display_name(),
                db_type.display_name()
            )));
        }
        config.validate()?;

        match driver.connect(config).await {
            Ok(client) => {
                tracing::info!(
                    connection_id = client.connection_id(),
                    database_type = %db_type,
                    target = %config.target(),
                    "Opened database connection"
                );
                Ok(client)
            }
            Err(e) => {
                tracing::warn!(
                    database_type = %db_type,
                    target = %config.target(),
                    error = %e,
                    "Failed to open database connection"
                );
                Err(e)
            }
        }
    }

    /// Open a client using the type recorded in the configuration
    pub async fn create_from_config(&self, config: &DatabaseConfig) -> Result<Box<dyn DatabaseClient>> {
        self.create(config.database_type, config).await
    }

    /// Open a client from a type tag such as `"postgresql"` or `"sqlite"`
    pub async fn create_from_tag(
        &self,
        tag: &str,
        config: &DatabaseConfig,
    ) -> Result<Box<dyn DatabaseClient>> {
        let db_type: DatabaseType = tag.parse()?;
        self.create(db_type, config).await
    }

    /// Open a client from a connection URL
    pub async fn create_from_url(&self, url: &str) -> Result<Box<dyn DatabaseClient>> {
        let config = DatabaseConfig::from_url(url)?;
        self.create_from_config(&config).await
    }
}

impl Default for ClientFactory {
    fn default() -> Self {
        Self::with_default_drivers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::traits::{DatabaseErrorKind, Params, ResultSet, SqlTemplate};

    // Mock driver for testing
    struct MockDriver;

    struct MockClient;

    #[async_trait::async_trait]
    impl DatabaseClient for MockClient {
        fn connection_id(&self) -> &str {
            "mock"
        }

        fn database_type(&self) -> DatabaseType {
            DatabaseType::Mssql
        }

        async fn execute(&self, sql: &SqlTemplate, _params: &Params) -> Result<ResultSet> {
            Ok(ResultSet::new(sql.as_str()))
        }

        async fn is_alive(&self) -> bool {
            true
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }

        async fn is_closed(&self) -> bool {
            false
        }
    }

    #[async_trait::async_trait]
    impl DatabaseDriver for MockDriver {
        fn database_type(&self) -> DatabaseType {
            DatabaseType::Mssql
        }

        async fn connect(&self, _config: &DatabaseConfig) -> Result<Box<dyn DatabaseClient>> {
            Ok(Box::new(MockClient))
        }
    }

    struct FailingDriver;

    #[async_trait::async_trait]
    impl DatabaseDriver for FailingDriver {
        fn database_type(&self) -> DatabaseType {
            DatabaseType::Postgresql
        }

        async fn connect(&self, _config: &DatabaseConfig) -> Result<Box<dyn DatabaseClient>> {
            Err(DatabaseError::connection(
                "Mock",
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
            ))
        }
    }

    fn mssql_config() -> DatabaseConfig {
        DatabaseConfig::server(DatabaseType::Mssql, "localhost", "master", "sa", "password")
    }

    #[tokio::test]
    async fn test_register_driver() {
        let factory = ClientFactory::new();
        factory.register(Arc::new(MockDriver)).await;

        assert!(factory.has_driver(DatabaseType::Mssql).await);
        assert_eq!(factory.supported_types().await, vec![DatabaseType::Mssql]);
    }

    #[tokio::test]
    async fn test_unregister_driver() {
        let factory = ClientFactory::new();
        factory.register(Arc::new(MockDriver)).await;
        factory.unregister(DatabaseType::Mssql).await;

        assert!(!factory.has_driver(DatabaseType::Mssql).await);
    }

    #[tokio::test]
    async fn test_create_with_registered_driver() {
        let factory = ClientFactory::new();
        factory.register(Arc::new(MockDriver)).await;

        let client = factory.create(DatabaseType::Mssql, &mssql_config()).await.unwrap();
        assert_eq!(client.connection_id(), "mock");
    }

    #[tokio::test]
    async fn test_create_without_driver_is_unsupported() {
        let factory = ClientFactory::new();
        let err = factory
            .create(DatabaseType::Mssql, &mssql_config())
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), DatabaseErrorKind::UnsupportedDatabase);
    }

    #[tokio::test]
    async fn test_create_from_unknown_tag() {
        let factory = ClientFactory::new();
        factory.register(Arc::new(MockDriver)).await;

        let err = factory
            .create_from_tag("db2", &mssql_config())
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), DatabaseErrorKind::UnsupportedDatabase);
    }

    #[tokio::test]
    async fn test_create_rejects_mismatched_or_invalid_config() {
        let factory = ClientFactory::new();
        factory.register(Arc::new(MockDriver)).await;

        let err = factory
            .create(DatabaseType::Mssql, &DatabaseConfig::sqlite_in_memory())
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), DatabaseErrorKind::Configuration);

        let mut config = mssql_config();
        config.host = None;
        let err = factory.create(DatabaseType::Mssql, &config).await.err().unwrap();
        assert_eq!(err.kind(), DatabaseErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_connection_failure_keeps_source() {
        let factory = ClientFactory::new();
        factory.register(Arc::new(FailingDriver)).await;

        let config = DatabaseConfig::server(DatabaseType::Postgresql, "localhost", "db", "u", "p");
        let err = factory.create_from_config(&config).await.err().unwrap();
        assert_eq!(err.kind(), DatabaseErrorKind::Connection);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[tokio::test]
    async fn test_default_drivers_cover_enabled_features() {
        let factory = ClientFactory::with_default_drivers();
        #[cfg(feature = "sqlite")]
        assert!(factory.has_driver(DatabaseType::Sqlite).await);
        #[cfg(feature = "postgres")]
        assert!(factory.has_driver(DatabaseType::Postgresql).await);
        #[cfg(feature = "mysql")]
        assert!(factory.has_driver(DatabaseType::Mysql).await);
        #[cfg(feature = "mssql")]
        assert!(factory.has_driver(DatabaseType::Mssql).await);
        let _ = factory;
    }
}
