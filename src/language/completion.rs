use lsp_types::{CompletionItem, CompletionItemKind, CompletionTextEdit, Position, Range, TextEdit};

use super::cache::{FieldEntry, MetadataCache, namespace};
use super::symbols::{ShellSymbolTable, SymbolCategory};
use super::visitor::{CompletionContext, CursorKind};

/// Resolve an extracted context against the metadata cache and the static
/// shell symbol tables. Pure: any fetch-on-miss happens before this call,
/// and a missing cache entry degrades to a smaller (or empty) list.
pub fn resolve(
    context: &CompletionContext,
    cache: &MetadataCache,
    symbols: &ShellSymbolTable,
) -> Vec<CompletionItem> {
    match context {
        CompletionContext::ObjectKeyInQuery { database_name, collection_name: Some(collection) } => {
            let fields = match database_name {
                Some(database) => cache.fields(&namespace(database, collection)),
                None => cache.fields_for_collection(collection),
            };
            fields.map(|fields| field_items(&fields)).unwrap_or_default()
        }
        CompletionContext::ObjectKeyInQuery { collection_name: None, .. } => Vec::new(),
        CompletionContext::CursorChain { kind: CursorKind::Aggregation, .. } => {
            symbols.category(SymbolCategory::AggregationCursor).to_vec()
        }
        CompletionContext::CursorChain { kind: CursorKind::Find, .. } => {
            symbols.category(SymbolCategory::Cursor).to_vec()
        }
        CompletionContext::MemberExpressionOnCollection { .. } => {
            symbols.category(SymbolCategory::Collection).to_vec()
        }
        CompletionContext::DbCallExpression { database_name, db_call_position } => {
            let mut items = symbols.category(SymbolCategory::Database).to_vec();
            if let Some(database) = database_name
                && let Some(collections) = cache.collections(database)
            {
                items.extend(collection_items(&collections, *db_call_position));
            }
            items
        }
        CompletionContext::UseStatement => database_items(&cache.databases()),
        CompletionContext::None => Vec::new(),
    }
}

fn field_items(fields: &[FieldEntry]) -> Vec<CompletionItem> {
    fields
        .iter()
        .map(|field| CompletionItem {
            label: field.name.clone(),
            kind: Some(field.kind),
            ..Default::default()
        })
        .collect()
}

fn database_items(databases: &[String]) -> Vec<CompletionItem> {
    databases
        .iter()
        .map(|name| CompletionItem {
            label: name.clone(),
            kind: Some(CompletionItemKind::VALUE),
            ..Default::default()
        })
        .collect()
}

/// Collection names appended to a `db.` completion. Names that are not
/// valid bare identifiers replace the three characters before the cursor
/// (the `db.` prefix) with a bracket access, so accepting the suggestion
/// does not leave a stray dot in the document.
fn collection_items(collections: &[String], db_call_position: Position) -> Vec<CompletionItem> {
    collections
        .iter()
        .map(|name| {
            if is_valid_property_name(name) {
                return CompletionItem {
                    label: name.clone(),
                    kind: Some(CompletionItemKind::PROPERTY),
                    ..Default::default()
                };
            }

            let line = db_call_position.line;
            let start_character = db_call_position.character.saturating_sub(3);
            CompletionItem {
                label: name.clone(),
                kind: Some(CompletionItemKind::PROPERTY),
                filter_text: Some("db.".to_string()),
                text_edit: Some(CompletionTextEdit::Edit(TextEdit {
                    range: Range::new(
                        Position::new(line, start_character),
                        Position::new(line, db_call_position.character),
                    ),
                    new_text: format!("db['{name}']"),
                })),
                ..Default::default()
            }
        })
        .collect()
}

/// Whether `name` can follow a dot without quoting.
pub fn is_valid_property_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if !first.is_ascii_digit() => {}
        _ => return false,
    }
    name.chars().all(|c| c.is_ascii_alphanumeric() || c == '$' || c == '_')
}
