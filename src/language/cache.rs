use std::collections::HashMap;

use lsp_types::CompletionItemKind;
use parking_lot::RwLock;

/// A field name inferred from a collection's schema sample.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldEntry {
    pub name: String,
    pub kind: CompletionItemKind,
}

/// Namespace key for the fields map.
pub fn namespace(database: &str, collection: &str) -> String {
    format!("{database}.{collection}")
}

/// Per-connection metadata used by the completion resolver. All three maps
/// share a lifetime with the active connection: `invalidate_all` runs on
/// every connect/disconnect transition. Population replaces the whole value
/// for a key (last-writer-wins), so readers never observe a partial entry.
#[derive(Default)]
pub struct MetadataCache {
    databases: RwLock<Vec<String>>,
    collections_by_database: RwLock<HashMap<String, Vec<String>>>,
    fields_by_namespace: RwLock<HashMap<String, Vec<FieldEntry>>>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn databases(&self) -> Vec<String> {
        self.databases.read().clone()
    }

    pub fn set_databases(&self, databases: Vec<String>) {
        *self.databases.write() = databases;
    }

    pub fn collections(&self, database: &str) -> Option<Vec<String>> {
        self.collections_by_database.read().get(database).cloned()
    }

    pub fn set_collections(&self, database: &str, collections: Vec<String>) {
        self.collections_by_database.write().insert(database.to_string(), collections);
    }

    pub fn fields(&self, namespace: &str) -> Option<Vec<FieldEntry>> {
        self.fields_by_namespace.read().get(namespace).cloned()
    }

    pub fn set_fields(&self, namespace: &str, fields: Vec<FieldEntry>) {
        self.fields_by_namespace.write().insert(namespace.to_string(), fields);
    }

    /// Best-effort lookup when the database is unknown: succeeds only if
    /// exactly one cached namespace ends in this collection name.
    pub fn fields_for_collection(&self, collection: &str) -> Option<Vec<FieldEntry>> {
        let suffix = format!(".{collection}");
        let map = self.fields_by_namespace.read();
        let mut matches = map.iter().filter(|(key, _)| key.ends_with(&suffix));
        let (_, fields) = matches.next()?;
        if matches.next().is_some() {
            return None;
        }
        Some(fields.clone())
    }

    /// Schema may change after a script runs; drop only the field samples.
    pub fn clear_fields(&self) {
        self.fields_by_namespace.write().clear();
    }

    /// Connection transition: drop everything at once.
    pub fn invalidate_all(&self) {
        self.databases.write().clear();
        self.collections_by_database.write().clear();
        self.fields_by_namespace.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_until_first_population() {
        let cache = MetadataCache::new();
        assert!(cache.databases().is_empty());
        assert_eq!(cache.collections("shop"), None);
        assert_eq!(cache.fields("shop.products"), None);
    }

    #[test]
    fn population_is_last_writer_wins() {
        let cache = MetadataCache::new();
        cache.set_collections("shop", vec!["products".into()]);
        cache.set_collections("shop", vec!["promotions".into(), "orders".into()]);
        assert_eq!(
            cache.collections("shop"),
            Some(vec!["promotions".to_string(), "orders".to_string()])
        );
    }

    #[test]
    fn invalidate_all_empties_every_map() {
        let cache = MetadataCache::new();
        cache.set_databases(vec!["shop".into()]);
        cache.set_collections("shop", vec!["products".into()]);
        cache.set_fields(
            &namespace("shop", "products"),
            vec![FieldEntry { name: "price".into(), kind: CompletionItemKind::FIELD }],
        );

        cache.invalidate_all();

        assert!(cache.databases().is_empty());
        assert_eq!(cache.collections("shop"), None);
        assert_eq!(cache.fields("shop.products"), None);
    }

    #[test]
    fn clear_fields_keeps_databases_and_collections() {
        let cache = MetadataCache::new();
        cache.set_databases(vec!["shop".into()]);
        cache.set_collections("shop", vec!["products".into()]);
        cache.set_fields(
            "shop.products",
            vec![FieldEntry { name: "price".into(), kind: CompletionItemKind::FIELD }],
        );

        cache.clear_fields();

        assert_eq!(cache.databases(), vec!["shop".to_string()]);
        assert!(cache.collections("shop").is_some());
        assert_eq!(cache.fields("shop.products"), None);
    }

    #[test]
    fn namespace_joins_with_dot() {
        assert_eq!(namespace("shop", "products"), "shop.products");
    }

    #[test]
    fn collection_fallback_needs_a_unique_match() {
        let cache = MetadataCache::new();
        let fields = vec![FieldEntry { name: "price".into(), kind: CompletionItemKind::FIELD }];
        cache.set_fields("shop.products", fields.clone());

        assert_eq!(cache.fields_for_collection("products"), Some(fields));
        assert_eq!(cache.fields_for_collection("orders"), None);

        // A second database with the same collection makes the lookup ambiguous.
        cache.set_fields("staging.products", Vec::new());
        assert_eq!(cache.fields_for_collection("products"), None);
    }
}
