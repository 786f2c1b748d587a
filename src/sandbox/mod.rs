//! Sandboxed script evaluation. Every request spawns one disposable node
//! process running the embedded worker, seeds it with the connection
//! parameters, sends exactly one command, and awaits exactly one reply.
//! A runaway script can therefore never block the host process; it is
//! cancelled in-band and the unit is killed when the grace period ends.

mod unit;

use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::assets::EmbeddedAssets;
use crate::connection::tools::node_path;
use crate::error::{Error, Result};

use unit::{ExecutionUnit, UnitOutcome};

/// Fixed wait between the polite stop signal and the hard kill, long
/// enough for the worker to close a live server connection.
pub const GRACE_PERIOD: Duration = Duration::from_secs(3);

const METADATA_TIMEOUT: Duration = Duration::from_secs(30);
const SIDECAR_ASSET: &str = "worker.js";

/// Cooperative cancellation flag shared between a request and its caller.
/// Cloning shares the underlying flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Commands understood by an execution unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitCommand {
    ExecuteAll,
    GetListDatabases,
    GetListCollections,
    GetFieldsFromSchema,
}

impl UnitCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitCommand::ExecuteAll => "EXECUTE_ALL",
            UnitCommand::GetListDatabases => "GET_LIST_DATABASES",
            UnitCommand::GetListCollections => "GET_LIST_COLLECTIONS",
            UnitCommand::GetFieldsFromSchema => "GET_FIELDS_FROM_SCHEMA",
        }
    }
}

/// Connection parameters forwarded verbatim to the worker.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSeed {
    pub connection_string: String,
    pub connection_options: Value,
}

#[derive(Serialize)]
struct UnitSeed<'a> {
    connection_string: &'a str,
    connection_options: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    database_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    collection_name: Option<&'a str>,
}

/// Terminal outcome of a script evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutput {
    Success(Value),
    Failure { message: String },
    Cancelled,
}

/// One inferred field of a collection's schema sample.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SchemaField {
    pub label: String,
}

/// Spawns and drives execution units. Holds only the resolved node binary
/// and the materialized worker script; all per-request state lives in the
/// unit itself.
pub struct ExecutionSandbox {
    node: PathBuf,
    sidecar: PathBuf,
}

impl ExecutionSandbox {
    pub fn new() -> Result<Self> {
        let node = node_path().ok_or_else(|| {
            Error::ToolNotFound("Node runtime not found. Install Node.js or set MANGROVE_NODE.".into())
        })?;
        let sidecar = write_sidecar_asset()?;
        Ok(Self { node, sidecar })
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.node);
        command.arg(&self.sidecar);
        command
    }

    /// Evaluate a whole script body. Script errors and cancellation are
    /// terminal outcomes, not `Err`; `Err` means the unit itself failed.
    pub fn execute_all(
        &self,
        connection: &ConnectionSeed,
        code: &str,
        token: &CancellationToken,
    ) -> Result<ExecutionOutput> {
        let mut unit = ExecutionUnit::spawn(self.command())?;
        unit.send_seed(&UnitSeed {
            connection_string: &connection.connection_string,
            connection_options: &connection.connection_options,
            code: Some(code),
            database_name: None,
            collection_name: None,
        })?;
        unit.send_command(UnitCommand::ExecuteAll.as_str())?;

        match unit.await_reply(token, None, GRACE_PERIOD)? {
            UnitOutcome::Cancelled => Ok(ExecutionOutput::Cancelled),
            UnitOutcome::Completed(reply) => match reply.error {
                Some(error) => Ok(ExecutionOutput::Failure {
                    message: error
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("Script evaluation failed")
                        .to_string(),
                }),
                None => Ok(ExecutionOutput::Success(reply.result)),
            },
        }
    }

    pub fn list_databases(
        &self,
        connection: &ConnectionSeed,
        token: &CancellationToken,
    ) -> Result<Vec<String>> {
        let value =
            self.metadata(connection, UnitCommand::GetListDatabases, None, None, token)?;
        serde_json::from_value(value).map_err(Error::from)
    }

    pub fn list_collections(
        &self,
        connection: &ConnectionSeed,
        database: &str,
        token: &CancellationToken,
    ) -> Result<Vec<String>> {
        let value = self.metadata(
            connection,
            UnitCommand::GetListCollections,
            Some(database),
            None,
            token,
        )?;
        serde_json::from_value(value).map_err(Error::from)
    }

    pub fn list_fields(
        &self,
        connection: &ConnectionSeed,
        database: &str,
        collection: &str,
        token: &CancellationToken,
    ) -> Result<Vec<SchemaField>> {
        let value = self.metadata(
            connection,
            UnitCommand::GetFieldsFromSchema,
            Some(database),
            Some(collection),
            token,
        )?;
        serde_json::from_value(value).map_err(Error::from)
    }

    fn metadata(
        &self,
        connection: &ConnectionSeed,
        command: UnitCommand,
        database_name: Option<&str>,
        collection_name: Option<&str>,
        token: &CancellationToken,
    ) -> Result<Value> {
        let mut unit = ExecutionUnit::spawn(self.command())?;
        unit.send_seed(&UnitSeed {
            connection_string: &connection.connection_string,
            connection_options: &connection.connection_options,
            code: None,
            database_name,
            collection_name,
        })?;
        unit.send_command(command.as_str())?;

        match unit.await_reply(token, Some(METADATA_TIMEOUT), GRACE_PERIOD)? {
            UnitOutcome::Cancelled => {
                Err(Error::Sandbox(format!("{} cancelled", command.as_str())))
            }
            UnitOutcome::Completed(reply) => match reply.error {
                Some(error) => Err(Error::Sandbox(
                    error
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("Metadata fetch failed")
                        .to_string(),
                )),
                None => Ok(reply.result),
            },
        }
    }
}

fn write_sidecar_asset() -> Result<PathBuf> {
    let data = EmbeddedAssets::get(SIDECAR_ASSET)
        .ok_or_else(|| Error::Sandbox(format!("Missing embedded asset: {}", SIDECAR_ASSET)))?;

    let mut target_dir = std::env::temp_dir();
    target_dir.push("mangrove");
    std::fs::create_dir_all(&target_dir)?;

    let target_path = target_dir.join(SIDECAR_ASSET);
    std::fs::write(&target_path, data.data)?;

    Ok(target_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn token_clones_share_the_flag() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn command_wire_names() {
        assert_eq!(UnitCommand::ExecuteAll.as_str(), "EXECUTE_ALL");
        assert_eq!(UnitCommand::GetListDatabases.as_str(), "GET_LIST_DATABASES");
        assert_eq!(UnitCommand::GetListCollections.as_str(), "GET_LIST_COLLECTIONS");
        assert_eq!(UnitCommand::GetFieldsFromSchema.as_str(), "GET_FIELDS_FROM_SCHEMA");
    }

    #[test]
    fn seed_omits_absent_fields() {
        let options = json!({ "appName": "mangrove" });
        let seed = UnitSeed {
            connection_string: "mongodb://localhost:27017",
            connection_options: &options,
            code: None,
            database_name: Some("shop"),
            collection_name: None,
        };
        let value = serde_json::to_value(&seed).expect("serialize seed");
        assert_eq!(value["connection_string"], "mongodb://localhost:27017");
        assert_eq!(value["database_name"], "shop");
        assert!(value.get("code").is_none());
        assert!(value.get("collection_name").is_none());
    }
}
