//! Application state management

use std::sync::Arc;

use crate::{
    auth::{AccessList, Authorizer},
    config::Config,
    database::Connector,
    error::{Error, Result},
};

/// Application state shared across handlers
///
/// Holds the only state requests share: configuration, the database
/// connector and the authorizer.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    connector: Arc<dyn Connector>,
    authorizer: Arc<dyn Authorizer>,
}

impl AppState {
    /// Create state from already constructed collaborators
    pub fn new(
        config: Config,
        connector: Arc<dyn Connector>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            connector,
            authorizer,
        }
    }

    /// Create a builder for AppState
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::new()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn connector(&self) -> &dyn Connector {
        self.connector.as_ref()
    }

    pub fn authorizer(&self) -> &dyn Authorizer {
        self.authorizer.as_ref()
    }
}

/// Builder for AppState
#[derive(Default)]
pub struct AppStateBuilder {
    config: Option<Config>,
    connector: Option<Arc<dyn Connector>>,
    authorizer: Option<Arc<dyn Authorizer>>,
}

impl AppStateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Use `connector` instead of connecting to the configured database
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Use `authorizer` instead of the configured access list
    pub fn authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    /// Build the AppState
    ///
    /// Without an explicit connector, a PostgreSQL pool is created from the
    /// `[database]` section, retrying with backoff. Without an explicit
    /// authorizer, an [`AccessList`] is built from the `[access]` section.
    pub async fn build(self) -> Result<AppState> {
        let config = self.config.unwrap_or_default();

        let connector = match self.connector {
            Some(connector) => connector,
            None => Self::connect(&config).await?,
        };

        let authorizer = match self.authorizer {
            Some(authorizer) => authorizer,
            None => Arc::new(AccessList::from_config(&config.access)?),
        };

        Ok(AppState::new(config, connector, authorizer))
    }

    #[cfg(feature = "database")]
    async fn connect(config: &Config) -> Result<Arc<dyn Connector>> {
        let db_config = config
            .database
            .as_ref()
            .ok_or_else(|| Error::Internal("no [database] section configured".to_string()))?;
        let connector = crate::database::PgConnector::connect(db_config).await?;
        Ok(Arc::new(connector))
    }

    #[cfg(not(feature = "database"))]
    async fn connect(_config: &Config) -> Result<Arc<dyn Connector>> {
        Err(Error::Internal(
            "built without the database feature; supply a connector".to_string(),
        ))
    }
}
