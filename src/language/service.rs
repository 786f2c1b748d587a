use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lsp_types::{CompletionItem, CompletionItemKind, Position};
use mongodb::Client;
use parking_lot::Mutex;
use serde_json::Value;

use crate::connection::ConnectionManager;
use crate::error::{Error, Result};
use crate::sandbox::{CancellationToken, ConnectionSeed, ExecutionOutput, ExecutionSandbox};

use super::cache::{FieldEntry, MetadataCache, namespace};
use super::completion;
use super::symbols::ShellSymbolTable;
use super::visitor::{self, CompletionContext};

/// User-facing notifications raised by the service. The editor transport
/// supplies the implementation; [`LogNotifier`] is the headless default.
pub trait Notifier: Send + Sync {
    fn show_error(&self, message: &str);
    fn show_information(&self, message: &str);
}

/// Routes notifications to the log when no editor is attached.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn show_error(&self, message: &str) {
        log::error!("{}", message);
    }

    fn show_information(&self, message: &str) {
        log::info!("{}", message);
    }
}

#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub connection_string: String,
    pub connection_options: Value,
}

/// Facade over the whole language core: owns the validated connection,
/// the metadata cache, the static symbol tables, and the sandbox that
/// evaluates scripts and fetches metadata.
pub struct LanguageService {
    manager: ConnectionManager,
    client: Mutex<Option<Client>>,
    seed: Mutex<Option<ConnectionSeed>>,
    sandbox: Mutex<Option<Arc<ExecutionSandbox>>>,
    cache: Arc<MetadataCache>,
    symbols: ShellSymbolTable,
    notifier: Arc<dyn Notifier>,
    /// Bumped on every connection teardown so in-flight background
    /// fetches from an earlier connection cannot repopulate the cache.
    epoch: Arc<AtomicU64>,
}

impl LanguageService {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            manager: ConnectionManager::new(),
            client: Mutex::new(None),
            seed: Mutex::new(None),
            sandbox: Mutex::new(None),
            cache: Arc::new(MetadataCache::new()),
            symbols: ShellSymbolTable::new(),
            notifier,
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    /// Validate and adopt a new connection. Returns `false` on failure,
    /// leaving no partial state behind. Databases are prefetched in the
    /// background so `use(...)` completions are warm.
    pub fn connect_to_service_provider(&self, params: ConnectParams) -> bool {
        self.drop_connection();

        let client = match self.manager.connect(&params.connection_string) {
            Ok(client) => client,
            Err(err) => {
                log::error!("Connection failed: {}", err);
                self.notifier.show_error(&format!("Unable to connect: {}", err));
                return false;
            }
        };

        let seed = ConnectionSeed {
            connection_string: params.connection_string,
            connection_options: params.connection_options,
        };
        *self.client.lock() = Some(client);
        *self.seed.lock() = Some(seed.clone());

        if let Ok(sandbox) = self.ensure_sandbox() {
            let cache = self.cache.clone();
            let epoch = self.epoch.clone();
            let spawned_at = epoch.load(Ordering::Acquire);
            std::thread::spawn(move || {
                match sandbox.list_databases(&seed, &CancellationToken::new()) {
                    Ok(databases) => {
                        adopt_prefetched_databases(&cache, &epoch, spawned_at, databases);
                    }
                    Err(err) => log::warn!("Database prefetch failed: {}", err),
                }
            });
        }

        true
    }

    pub fn disconnect(&self) {
        self.drop_connection();
    }

    /// Classify the cursor position, fetch any missing metadata for that
    /// context, and resolve the completion list. Fetch failures degrade to
    /// whatever is already cached; this never returns an error.
    pub fn provide_completion_items(
        &self,
        text: &str,
        position: Position,
        token: &CancellationToken,
    ) -> Vec<CompletionItem> {
        let context = visitor::classify(text, position);
        self.fetch_for_context(&context, token);
        completion::resolve(&context, &self.cache, &self.symbols)
    }

    /// Evaluate a whole script in a disposable sandbox unit. Field samples
    /// are dropped first since the script may change the schema.
    pub fn execute_all(&self, code: &str, token: &CancellationToken) -> Result<ExecutionOutput> {
        let seed = self
            .current_seed()
            .ok_or_else(|| Error::Sandbox("Not connected to a deployment".into()))?;
        let sandbox = self.ensure_sandbox()?;

        self.cache.clear_fields();

        let output = sandbox.execute_all(&seed, code, token)?;
        match &output {
            ExecutionOutput::Failure { message } => self.notifier.show_error(message),
            ExecutionOutput::Cancelled => {
                self.notifier.show_information("The running playground operation was terminated.");
            }
            ExecutionOutput::Success(_) => {}
        }
        Ok(output)
    }

    fn fetch_for_context(&self, context: &CompletionContext, token: &CancellationToken) {
        let plan = missing_metadata(context, &self.cache);
        if plan.is_empty() {
            return;
        }
        let Some(seed) = self.current_seed() else {
            return;
        };
        let Ok(sandbox) = self.ensure_sandbox() else {
            return;
        };

        for fetch in plan {
            match fetch {
                MetadataFetch::Databases => match sandbox.list_databases(&seed, token) {
                    Ok(databases) => self.cache.set_databases(databases),
                    Err(err) => log::warn!("Database fetch failed: {}", err),
                },
                MetadataFetch::Collections { database } => {
                    match sandbox.list_collections(&seed, &database, token) {
                        Ok(collections) => self.cache.set_collections(&database, collections),
                        Err(err) => {
                            log::warn!("Collection fetch failed for {}: {}", database, err);
                        }
                    }
                }
                MetadataFetch::Fields { database, collection } => {
                    match sandbox.list_fields(&seed, &database, &collection, token) {
                        Ok(fields) => {
                            let entries = fields
                                .into_iter()
                                .map(|field| FieldEntry {
                                    name: field.label,
                                    kind: CompletionItemKind::FIELD,
                                })
                                .collect();
                            self.cache.set_fields(&namespace(&database, &collection), entries);
                        }
                        Err(err) => {
                            log::warn!(
                                "Field fetch failed for {}.{}: {}",
                                database,
                                collection,
                                err
                            );
                        }
                    }
                }
            }
        }
    }

    fn drop_connection(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.cache.invalidate_all();
        *self.seed.lock() = None;
        if let Some(client) = self.client.lock().take() {
            self.manager.disconnect(client);
        }
    }

    fn current_seed(&self) -> Option<ConnectionSeed> {
        self.seed.lock().clone()
    }

    fn ensure_sandbox(&self) -> Result<Arc<ExecutionSandbox>> {
        let mut guard = self.sandbox.lock();
        if let Some(sandbox) = guard.as_ref() {
            return Ok(sandbox.clone());
        }
        let sandbox = Arc::new(ExecutionSandbox::new()?);
        *guard = Some(sandbox.clone());
        Ok(sandbox)
    }
}

/// What the classified context needs that the cache cannot serve yet.
/// Collections are fetched whenever a database is resolved, fields whenever
/// a full namespace is, so browsing `db.<coll>.` warms the cache for the
/// query completions that usually follow.
#[derive(Debug, PartialEq)]
enum MetadataFetch {
    Databases,
    Collections { database: String },
    Fields { database: String, collection: String },
}

fn missing_metadata(context: &CompletionContext, cache: &MetadataCache) -> Vec<MetadataFetch> {
    let mut plan = Vec::new();

    if matches!(context, CompletionContext::UseStatement) && cache.databases().is_empty() {
        plan.push(MetadataFetch::Databases);
    }

    if let Some(database) = context.database_name() {
        if cache.collections(database).is_none() {
            plan.push(MetadataFetch::Collections { database: database.to_string() });
        }
        if let Some(collection) = context.collection_name()
            && cache.fields(&namespace(database, collection)).is_none()
        {
            plan.push(MetadataFetch::Fields {
                database: database.to_string(),
                collection: collection.to_string(),
            });
        }
    }

    plan
}

/// Apply a background database prefetch only if the connection it was
/// started for is still the current one.
fn adopt_prefetched_databases(
    cache: &MetadataCache,
    epoch: &AtomicU64,
    spawned_at: u64,
    databases: Vec<String>,
) {
    if epoch.load(Ordering::Acquire) == spawned_at {
        cache.set_databases(databases);
    } else {
        log::debug!("Dropping database prefetch from a previous connection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member_context() -> CompletionContext {
        CompletionContext::MemberExpressionOnCollection {
            database_name: Some("shop".into()),
            collection_name: "products".into(),
        }
    }

    // ── Fetch planning ──────────────────────────────────────────────

    #[test]
    fn member_context_plans_collection_and_field_fetches() {
        let cache = MetadataCache::new();
        let plan = missing_metadata(&member_context(), &cache);
        assert_eq!(
            plan,
            vec![
                MetadataFetch::Collections { database: "shop".into() },
                MetadataFetch::Fields { database: "shop".into(), collection: "products".into() },
            ]
        );
    }

    #[test]
    fn warm_cache_plans_nothing() {
        let cache = MetadataCache::new();
        cache.set_collections("shop", vec!["products".into()]);
        cache.set_fields(&namespace("shop", "products"), Vec::new());
        assert!(missing_metadata(&member_context(), &cache).is_empty());
    }

    #[test]
    fn db_call_with_database_plans_collections() {
        let context = CompletionContext::DbCallExpression {
            database_name: Some("shop".into()),
            db_call_position: Position::new(0, 3),
        };
        assert_eq!(
            missing_metadata(&context, &MetadataCache::new()),
            vec![MetadataFetch::Collections { database: "shop".into() }]
        );
    }

    #[test]
    fn db_call_without_database_plans_nothing() {
        let context = CompletionContext::DbCallExpression {
            database_name: None,
            db_call_position: Position::new(0, 3),
        };
        assert!(missing_metadata(&context, &MetadataCache::new()).is_empty());
    }

    #[test]
    fn cursor_chain_plans_like_its_namespace() {
        let context = CompletionContext::CursorChain {
            kind: visitor::CursorKind::Find,
            database_name: Some("shop".into()),
            collection_name: Some("products".into()),
        };
        let plan = missing_metadata(&context, &MetadataCache::new());
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn use_statement_plans_database_fetch_once() {
        let cache = MetadataCache::new();
        assert_eq!(
            missing_metadata(&CompletionContext::UseStatement, &cache),
            vec![MetadataFetch::Databases]
        );
        cache.set_databases(vec!["shop".into()]);
        assert!(missing_metadata(&CompletionContext::UseStatement, &cache).is_empty());
    }

    // ── Prefetch epoch guard ────────────────────────────────────────

    #[test]
    fn prefetch_from_current_connection_is_adopted() {
        let cache = MetadataCache::new();
        let epoch = AtomicU64::new(0);
        adopt_prefetched_databases(&cache, &epoch, 0, vec!["shop".into()]);
        assert_eq!(cache.databases(), vec!["shop".to_string()]);
    }

    #[test]
    fn prefetch_from_a_previous_connection_is_dropped() {
        let cache = MetadataCache::new();
        let epoch = AtomicU64::new(0);

        // The connection is torn down while the fetch is in flight.
        epoch.fetch_add(1, Ordering::AcqRel);
        cache.invalidate_all();

        adopt_prefetched_databases(&cache, &epoch, 0, vec!["shop".into()]);
        assert!(cache.databases().is_empty());
    }

    #[test]
    fn disconnect_advances_the_connection_epoch() {
        let service = LanguageService::new(Arc::new(LogNotifier));
        let before = service.epoch.load(Ordering::Acquire);
        service.disconnect();
        assert!(service.epoch.load(Ordering::Acquire) > before);
    }
}
