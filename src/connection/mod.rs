//! Connection lifecycle boundary: validate and hold the active MongoDB
//! client. Metadata and script evaluation go through the execution sandbox,
//! never through this client.

pub mod tools;

use std::time::Duration;

use mongodb::Client;
use mongodb::bson::doc;
use tokio::runtime::Runtime;

use crate::error::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Owns the Tokio runtime used for MongoDB driver calls.
pub struct ConnectionManager {
    runtime: Runtime,
}

impl ConnectionManager {
    pub fn new() -> Self {
        let runtime = Runtime::new().expect("Failed to create Tokio runtime");
        Self { runtime }
    }

    /// Connect and verify reachability with a ping (runs in the Tokio runtime).
    pub fn connect(&self, uri: &str) -> Result<Client> {
        let uri = uri.to_string();
        self.runtime.block_on(async {
            let fut = async {
                let client = Client::with_uri_str(&uri).await?;
                client.database("admin").run_command(doc! { "ping": 1 }).await?;
                Ok::<Client, mongodb::error::Error>(client)
            };

            match tokio::time::timeout(CONNECT_TIMEOUT, fut).await {
                Ok(result) => result.map_err(Error::from),
                Err(_) => Err(Error::Timeout("Connection timed out".to_string())),
            }
        })
    }

    /// Shut down a client, releasing its connection pool.
    pub fn disconnect(&self, client: Client) {
        self.runtime.block_on(async {
            client.shutdown().await;
        });
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
