//! MongoDB connection management with pool configuration.

use mongodb::options::{ClientOptions, ServerApi, ServerApiVersion};
use mongodb::{bson::doc, Client, Collection, Database};
use quarrygate_common::GatewayError;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_pool_size: Option<u32>,
    pub max_pool_size: Option<u32>,
    pub connect_timeout: Option<Duration>,
    pub server_selection_timeout: Option<Duration>,
    pub app_name: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: Some(1),
            max_pool_size: Some(10),
            connect_timeout: Some(Duration::from_secs(10)),
            server_selection_timeout: Some(Duration::from_secs(30)),
            app_name: Some("quarrygate".to_string()),
        }
    }
}

pub struct Connection {
    client: Client,
    database: Database,
}

impl Connection {
    pub async fn new(connection_string: &str, config: PoolConfig) -> Result<Self, GatewayError> {
        let mut client_options = ClientOptions::parse(connection_string)
            .await
            .map_err(|err| GatewayError::internal(format!("invalid MongoDB connection string: {err}")))?;

        client_options.min_pool_size = config.min_pool_size;
        client_options.max_pool_size = config.max_pool_size;
        client_options.connect_timeout = config.connect_timeout;
        client_options.server_selection_timeout = config.server_selection_timeout;
        client_options.app_name = config.app_name;
        client_options.server_api = Some(ServerApi::builder().version(ServerApiVersion::V1).build());

        let client = Client::with_options(client_options)
            .map_err(|err| GatewayError::internal(format!("failed to build MongoDB client: {err}")))?;

        let database = client.default_database().ok_or_else(|| {
            GatewayError::internal("connection string carries no default database")
        })?;

        Ok(Self { client, database })
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn get_collection(&self, name: &str) -> Collection<bson::Document> {
        self.database.collection(name)
    }

    pub async fn ping(&self) -> Result<(), GatewayError> {
        self.database
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(|err| GatewayError::internal(format!("MongoDB ping failed: {err}")))
    }

    #[allow(dead_code)]
    pub fn client(&self) -> &Client {
        &self.client
    }
}
