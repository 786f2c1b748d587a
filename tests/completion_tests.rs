//! End-to-end completion scenarios driven through `LanguageService` with a
//! pre-populated metadata cache, so no live deployment is needed.

use std::sync::Arc;

use lsp_types::{CompletionItemKind, CompletionTextEdit, Position};
use mangrove::language::cache::FieldEntry;
use mangrove::{
    CancellationToken, CompletionContext, CursorKind, LanguageService, LogNotifier, classify,
};

fn service() -> LanguageService {
    let _ = env_logger::builder().is_test(true).try_init();
    LanguageService::new(Arc::new(LogNotifier))
}

fn end_of(text: &str) -> Position {
    Position::new(0, text.len() as u32)
}

// =============================================================================
// Scenario: bare `db.` with an empty cache
// =============================================================================

#[test]
fn test_db_dot_returns_database_symbols_only() {
    let text = "db.";
    let context = classify(text, end_of(text));
    assert!(matches!(
        context,
        CompletionContext::DbCallExpression { database_name: None, .. }
    ));

    let service = service();
    let items = service.provide_completion_items(text, end_of(text), &CancellationToken::new());
    let labels: Vec<_> = items.iter().map(|i| i.label.as_str()).collect();
    assert!(labels.contains(&"getCollection"));
    assert!(labels.contains(&"runCommand"));
    // No collections are appended without a cached database.
    assert!(items.iter().all(|i| i.kind == Some(CompletionItemKind::METHOD)));
}

// =============================================================================
// Scenario: `use('shop'); db.pro` with cached collections
// =============================================================================

#[test]
fn test_use_then_partial_collection_appends_cached_collections() {
    let text = "use('shop'); db.pro";
    let context = classify(text, end_of(text));
    let CompletionContext::DbCallExpression { database_name, .. } = &context else {
        panic!("expected a db call expression, got {:?}", context);
    };
    assert_eq!(database_name.as_deref(), Some("shop"));

    let service = service();
    service.cache().set_collections("shop", vec!["products".into(), "promotions".into()]);

    let items = service.provide_completion_items(text, end_of(text), &CancellationToken::new());
    let labels: Vec<_> = items.iter().map(|i| i.label.as_str()).collect();
    assert!(labels.contains(&"getCollection"));
    assert!(labels.contains(&"products"));
    assert!(labels.contains(&"promotions"));
}

// =============================================================================
// Scenario: object key inside `find({` with cached fields
// =============================================================================

#[test]
fn test_object_key_returns_exactly_cached_fields() {
    let text = "db.products.find({ ";
    let context = classify(text, end_of(text));
    let CompletionContext::ObjectKeyInQuery { collection_name, .. } = &context else {
        panic!("expected an object key context, got {:?}", context);
    };
    assert_eq!(collection_name.as_deref(), Some("products"));

    let service = service();
    service.cache().set_fields(
        "shop.products",
        vec![FieldEntry { name: "price".into(), kind: CompletionItemKind::FIELD }],
    );

    let items = service.provide_completion_items(text, end_of(text), &CancellationToken::new());
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].label, "price");
    assert_eq!(items[0].kind, Some(CompletionItemKind::FIELD));
}

// =============================================================================
// Scenario: cursor chains
// =============================================================================

#[test]
fn test_aggregation_chain_returns_aggregation_cursor_symbols() {
    let text = "db.products.aggregate([{$match:{}}]).";
    let context = classify(text, end_of(text));
    assert!(matches!(
        context,
        CompletionContext::CursorChain { kind: CursorKind::Aggregation, .. }
    ));

    let service = service();
    let items = service.provide_completion_items(text, end_of(text), &CancellationToken::new());
    let labels: Vec<_> = items.iter().map(|i| i.label.as_str()).collect();
    assert!(labels.contains(&"toArray"));
    assert!(!labels.contains(&"sort"));
}

#[test]
fn test_find_chain_returns_cursor_symbols() {
    let text = "db.products.find().";
    let context = classify(text, end_of(text));
    assert!(matches!(context, CompletionContext::CursorChain { kind: CursorKind::Find, .. }));

    let service = service();
    let items = service.provide_completion_items(text, end_of(text), &CancellationToken::new());
    assert!(items.iter().any(|i| i.label == "sort"));
    assert!(items.iter().any(|i| i.label == "limit"));
}

#[test]
fn test_collection_member_returns_collection_symbols() {
    let text = "db.products.";
    let service = service();
    let items = service.provide_completion_items(text, end_of(text), &CancellationToken::new());
    let labels: Vec<_> = items.iter().map(|i| i.label.as_str()).collect();
    assert!(labels.contains(&"find"));
    assert!(labels.contains(&"insertOne"));
}

// =============================================================================
// Scenario: `use(` argument lists cached database names
// =============================================================================

#[test]
fn test_use_statement_lists_cached_databases() {
    let text = "use('";
    let service = service();
    service.cache().set_databases(vec!["admin".into(), "shop".into()]);

    let items = service.provide_completion_items(text, end_of(text), &CancellationToken::new());
    let labels: Vec<_> = items.iter().map(|i| i.label.as_str()).collect();
    assert_eq!(labels, vec!["admin", "shop"]);
}

// =============================================================================
// Scenario: collection names that are not valid identifiers
// =============================================================================

#[test]
fn test_invalid_collection_name_carries_bracket_text_edit() {
    let text = "use('shop'); db.";
    let service = service();
    service.cache().set_collections("shop", vec!["my-coll".into()]);

    let items = service.provide_completion_items(text, end_of(text), &CancellationToken::new());
    let item = items.iter().find(|i| i.label == "my-coll").expect("my-coll suggested");

    assert_eq!(item.filter_text.as_deref(), Some("db."));
    let Some(CompletionTextEdit::Edit(edit)) = &item.text_edit else {
        panic!("expected a text edit");
    };
    assert_eq!(edit.new_text, "db['my-coll']");
    assert_eq!(edit.range.start, Position::new(0, 13));
    assert_eq!(edit.range.end, Position::new(0, 16));
}

// =============================================================================
// Totality: classification never panics, completion degrades to empty
// =============================================================================

#[test]
fn test_classification_is_total_on_hostile_input() {
    let service = service();
    let token = CancellationToken::new();
    let samples = [
        "",
        "   ",
        "db",
        "}}])",
        "use(",
        "db..",
        "const x = { a: [1, 2",
        "function f() { return db.",
        "\u{1F980} emoji text . ",
    ];
    for text in samples {
        for character in [0u32, 1, 3, 100] {
            for line in [0u32, 5] {
                let _ = classify(text, Position::new(line, character));
                let _ = service.provide_completion_items(
                    text,
                    Position::new(line, character),
                    &token,
                );
            }
        }
    }
}

#[test]
fn test_value_position_yields_no_suggestions() {
    let text = "db.products.find({ price: ";
    let service = service();
    service.cache().set_fields(
        "shop.products",
        vec![FieldEntry { name: "price".into(), kind: CompletionItemKind::FIELD }],
    );
    let items = service.provide_completion_items(text, end_of(text), &CancellationToken::new());
    assert!(items.is_empty());
}
