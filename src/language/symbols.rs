use lsp_types::{CompletionItem, CompletionItemKind};

/// Shell API symbol categories the resolver serves from static tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolCategory {
    Database,
    Collection,
    Cursor,
    AggregationCursor,
}

const DATABASE_METHODS: &[&str] = &[
    "adminCommand",
    "aggregate",
    "auth",
    "changeUserPassword",
    "createCollection",
    "createUser",
    "createView",
    "currentOp",
    "dropDatabase",
    "dropUser",
    "getCollection",
    "getCollectionInfos",
    "getCollectionNames",
    "getMongo",
    "getName",
    "getSiblingDB",
    "hello",
    "killOp",
    "listCommands",
    "logout",
    "printCollectionStats",
    "runCommand",
    "serverStatus",
    "stats",
    "version",
];

const COLLECTION_METHODS: &[&str] = &[
    "aggregate",
    "bulkWrite",
    "countDocuments",
    "createIndex",
    "createIndexes",
    "dataSize",
    "deleteMany",
    "deleteOne",
    "distinct",
    "drop",
    "dropIndex",
    "dropIndexes",
    "estimatedDocumentCount",
    "explain",
    "find",
    "findOne",
    "findOneAndDelete",
    "findOneAndReplace",
    "findOneAndUpdate",
    "getDB",
    "getIndexes",
    "getName",
    "insertMany",
    "insertOne",
    "isCapped",
    "renameCollection",
    "replaceOne",
    "stats",
    "storageSize",
    "totalIndexSize",
    "updateMany",
    "updateOne",
    "watch",
];

const CURSOR_METHODS: &[&str] = &[
    "addOption",
    "allowDiskUse",
    "allowPartialResults",
    "batchSize",
    "close",
    "collation",
    "comment",
    "count",
    "explain",
    "forEach",
    "hasNext",
    "hint",
    "isClosed",
    "isExhausted",
    "itcount",
    "limit",
    "map",
    "max",
    "maxTimeMS",
    "min",
    "next",
    "noCursorTimeout",
    "projection",
    "readPref",
    "returnKey",
    "size",
    "skip",
    "sort",
    "tailable",
    "toArray",
    "tryNext",
];

const AGGREGATION_CURSOR_METHODS: &[&str] = &[
    "batchSize",
    "close",
    "explain",
    "forEach",
    "hasNext",
    "isClosed",
    "isExhausted",
    "itcount",
    "map",
    "maxTimeMS",
    "next",
    "objsLeftInBatch",
    "toArray",
    "tryNext",
];

/// Static shell API completion items, built once at startup and shared
/// read-only across requests.
pub struct ShellSymbolTable {
    database: Vec<CompletionItem>,
    collection: Vec<CompletionItem>,
    cursor: Vec<CompletionItem>,
    aggregation_cursor: Vec<CompletionItem>,
}

impl ShellSymbolTable {
    pub fn new() -> Self {
        Self {
            database: method_items(DATABASE_METHODS),
            collection: method_items(COLLECTION_METHODS),
            cursor: method_items(CURSOR_METHODS),
            aggregation_cursor: method_items(AGGREGATION_CURSOR_METHODS),
        }
    }

    pub fn category(&self, category: SymbolCategory) -> &[CompletionItem] {
        match category {
            SymbolCategory::Database => &self.database,
            SymbolCategory::Collection => &self.collection,
            SymbolCategory::Cursor => &self.cursor,
            SymbolCategory::AggregationCursor => &self.aggregation_cursor,
        }
    }
}

impl Default for ShellSymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

fn method_items(names: &[&str]) -> Vec<CompletionItem> {
    names
        .iter()
        .map(|label| CompletionItem {
            label: (*label).to_string(),
            kind: Some(CompletionItemKind::METHOD),
            ..Default::default()
        })
        .collect()
}
