use lsp_types::Position;
use tree_sitter::{Node, Parser};

/// Cursor-returning method family at the end of a call chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorKind {
    Aggregation,
    Find,
}

/// Classification of the cursor position inside a playground script.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CompletionContext {
    /// Cursor inside the arguments of a top-level `use(...)` call.
    UseStatement,
    /// Cursor completing a property of the bare `db` object.
    DbCallExpression {
        database_name: Option<String>,
        /// Request cursor position, kept for text-edit generation.
        db_call_position: Position,
    },
    /// Cursor completing a member of `db.<collection>`.
    MemberExpressionOnCollection {
        database_name: Option<String>,
        collection_name: String,
    },
    /// Cursor in an object-literal key slot inside a query call argument.
    ObjectKeyInQuery {
        database_name: Option<String>,
        collection_name: Option<String>,
    },
    /// Cursor completing a member of a cursor returned by `find`/`aggregate`.
    CursorChain {
        kind: CursorKind,
        database_name: Option<String>,
        collection_name: Option<String>,
    },
    #[default]
    None,
}

impl CompletionContext {
    pub fn database_name(&self) -> Option<&str> {
        match self {
            CompletionContext::DbCallExpression { database_name, .. }
            | CompletionContext::MemberExpressionOnCollection { database_name, .. }
            | CompletionContext::ObjectKeyInQuery { database_name, .. }
            | CompletionContext::CursorChain { database_name, .. } => database_name.as_deref(),
            _ => None,
        }
    }

    pub fn collection_name(&self) -> Option<&str> {
        match self {
            CompletionContext::MemberExpressionOnCollection { collection_name, .. } => {
                Some(collection_name.as_str())
            }
            CompletionContext::ObjectKeyInQuery { collection_name, .. }
            | CompletionContext::CursorChain { collection_name, .. } => collection_name.as_deref(),
            _ => None,
        }
    }
}

// ── Main entry point ───────────────────────────────────────────────────────

/// Classify the completion context at `position`. Total: any input yields
/// exactly one context, parse failures degrade to `CompletionContext::None`.
pub fn classify(text: &str, position: Position) -> CompletionContext {
    let (clean, offset, removed) = remove_trigger_dot(text, position);

    let mut parser = Parser::new();
    if parser.set_language(&tree_sitter_javascript::LANGUAGE.into()).is_err() {
        log::warn!("Completion parser language init failed");
        return classify_fallback(&clean, offset, removed, position, None);
    }

    let Some(tree) = parser.parse(&clean, None) else {
        log::warn!("Completion parse failed, degrading to textual fallback");
        return classify_fallback(&clean, offset, removed, position, None);
    };

    let root = tree.root_node();
    let use_db = database_from_use(&clean, &root, offset)
        .or_else(|| database_from_use_textual(&clean, offset));

    let offset = offset.min(clean.len());
    let node = root.named_descendant_for_byte_range(offset.saturating_sub(1), offset);

    if let Some(node) = node {
        if detect_use_statement(&clean, node, offset) {
            return CompletionContext::UseStatement;
        }

        if let Some(ctx) = detect_object_key(&clean, node, offset, use_db.clone()) {
            return ctx;
        }

        if let Some(ctx) = detect_member_chain(&clean, node, offset, removed, position, &use_db) {
            return ctx;
        }
    }

    classify_fallback(&clean, offset, removed, position, use_db)
}

fn classify_fallback(
    clean: &str,
    offset: usize,
    removed: bool,
    position: Position,
    use_db: Option<String>,
) -> CompletionContext {
    let use_db = use_db.or_else(|| database_from_use_textual(clean, offset));

    if let Some(ctx) = fallback_object_key(clean, offset, use_db.clone()) {
        return ctx;
    }
    if let Some(ctx) = fallback_member_access(clean, offset, removed, position, &use_db) {
        return ctx;
    }
    if fallback_use_statement(clean, offset) {
        return CompletionContext::UseStatement;
    }

    CompletionContext::None
}

// ── Trigger character handling ─────────────────────────────────────────────

/// Byte offset of an LSP position; columns beyond the line clamp to its end.
fn byte_offset(text: &str, position: Position) -> usize {
    let mut offset = 0;
    for (index, line) in text.split('\n').enumerate() {
        if index == position.line as usize {
            return offset + (position.character as usize).min(line.len());
        }
        offset += line.len() + 1;
    }
    text.len()
}

/// Remove the trigger dot directly before the cursor, if present, so that
/// `db.collection.` parses as `db.collection`. Returns the text to parse,
/// the adjusted cursor offset, and whether a dot was removed.
fn remove_trigger_dot(text: &str, position: Position) -> (String, usize, bool) {
    let offset = byte_offset(text, position);
    if position.character > 0 && offset > 0 && text.as_bytes().get(offset - 1) == Some(&b'.') {
        let mut clean = String::with_capacity(text.len() - 1);
        clean.push_str(&text[..offset - 1]);
        clean.push_str(&text[offset..]);
        return (clean, offset - 1, true);
    }
    (text.to_string(), offset, false)
}

// ── use(...) detection ─────────────────────────────────────────────────────

fn detect_use_statement(text: &str, node: Node, offset: usize) -> bool {
    let mut current = node;
    loop {
        if current.kind() == "call_expression"
            && let Some(callee) = current.child_by_field_name("function")
            && callee.kind() == "identifier"
            && node_text(text, &callee) == "use"
            && let Some(args) = current.child_by_field_name("arguments")
            && offset > args.start_byte()
            && offset <= args.end_byte()
        {
            return true;
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => return false,
        }
    }
}

/// Best-effort database name from the last `use('<name>')` call preceding
/// the cursor, scanning the whole document rather than lexical scope.
fn database_from_use(text: &str, root: &Node, offset: usize) -> Option<String> {
    let mut found = None;
    let mut stack = vec![*root];
    while let Some(node) = stack.pop() {
        if node.kind() == "call_expression"
            && node.start_byte() <= offset
            && let Some(callee) = node.child_by_field_name("function")
            && callee.kind() == "identifier"
            && node_text(text, &callee) == "use"
            && let Some(args) = node.child_by_field_name("arguments")
            && let Some(first) = args.named_child(0)
            && first.kind() == "string"
        {
            let name = strip_quotes(&node_text(text, &first));
            if !name.is_empty() {
                match found {
                    Some((at, _)) if at > node.start_byte() => {}
                    _ => found = Some((node.start_byte(), name)),
                }
            }
        }
        for i in 0..node.named_child_count() {
            if let Some(child) = node.named_child(i) {
                stack.push(child);
            }
        }
    }
    found.map(|(_, name)| name)
}

fn database_from_use_textual(text: &str, offset: usize) -> Option<String> {
    let mut found = None;
    let mut search = 0;
    while let Some(relative) = text[search..].find("use") {
        let at = search + relative;
        search = at + 3;
        if at > offset {
            break;
        }
        if at > 0 && is_ident_byte(text.as_bytes()[at - 1]) {
            continue;
        }
        let rest = text[at + 3..].trim_start();
        let Some(rest) = rest.strip_prefix('(') else { continue };
        let rest = rest.trim_start();
        let Some(quote) = rest.chars().next().filter(|c| matches!(c, '"' | '\'')) else {
            continue;
        };
        if let Some(end) = rest[1..].find(quote) {
            let name = &rest[1..1 + end];
            if !name.is_empty() {
                found = Some(name.to_string());
            }
        }
    }
    found
}

// ── Object-key detection ───────────────────────────────────────────────────

fn detect_object_key(
    text: &str,
    node: Node,
    offset: usize,
    use_db: Option<String>,
) -> Option<CompletionContext> {
    let mut current = node;
    let object = loop {
        match current.kind() {
            "pair" => {
                if !in_key_of_pair(&current, offset) {
                    return None;
                }
                break current.parent()?;
            }
            "object" => {
                if let Some(pair) = pair_containing_cursor(&current, offset) {
                    if !in_key_of_pair(&pair, offset) {
                        return None;
                    }
                }
                break current;
            }
            "array" | "call_expression" | "statement_block" | "program" => return None,
            _ => {}
        }
        current = current.parent()?;
    };

    let call = enclosing_call(object)?;
    let callee = call.child_by_field_name("function")?;
    if callee.kind() != "member_expression" {
        return None;
    }
    let chain_object = callee.child_by_field_name("object")?;
    let collection = collection_of(text, &chain_object)?;

    Some(CompletionContext::ObjectKeyInQuery {
        database_name: use_db,
        collection_name: Some(collection),
    })
}

fn pair_containing_cursor<'a>(object: &Node<'a>, offset: usize) -> Option<Node<'a>> {
    for i in 0..object.named_child_count() {
        if let Some(child) = object.named_child(i)
            && child.kind() == "pair"
            && offset >= child.start_byte()
            && offset <= child.end_byte()
        {
            return Some(child);
        }
    }
    None
}

fn in_key_of_pair(pair: &Node, offset: usize) -> bool {
    if let Some(key) = pair.child_by_field_name("key") {
        return offset >= key.start_byte() && offset <= key.end_byte();
    }
    false
}

fn enclosing_call<'a>(mut node: Node<'a>) -> Option<Node<'a>> {
    loop {
        if node.kind() == "call_expression" {
            return Some(node);
        }
        node = node.parent()?;
    }
}

// ── Member-chain detection ─────────────────────────────────────────────────

fn detect_member_chain(
    text: &str,
    node: Node,
    offset: usize,
    removed: bool,
    position: Position,
    use_db: &Option<String>,
) -> Option<CompletionContext> {
    if removed {
        // The user typed a dot after a complete expression; classify the
        // expression ending exactly at the adjusted cursor.
        let candidate = expression_ending_at(node, offset)?;
        return analyze_chain_end(text, &candidate, position, use_db);
    }

    // Typing a partial property name: `db.pro` or `db.users.fi`.
    if node.kind() == "property_identifier"
        && let Some(parent) = node.parent()
        && parent.kind() == "member_expression"
        && let Some(object) = parent.child_by_field_name("object")
    {
        return analyze_chain_end(text, &object, position, use_db);
    }

    None
}

/// Widen the node at the cursor to the largest chain expression ending at
/// `offset` (member access, subscript, or call).
fn expression_ending_at<'a>(node: Node<'a>, offset: usize) -> Option<Node<'a>> {
    if node.end_byte() != offset {
        return None;
    }
    let mut candidate = node;
    while let Some(parent) = candidate.parent() {
        if parent.end_byte() != offset {
            break;
        }
        match parent.kind() {
            "member_expression" | "subscript_expression" | "call_expression" | "arguments" => {
                candidate = parent;
            }
            _ => break,
        }
    }
    Some(candidate)
}

fn analyze_chain_end(
    text: &str,
    node: &Node,
    position: Position,
    use_db: &Option<String>,
) -> Option<CompletionContext> {
    match node.kind() {
        "identifier" if node_text(text, node) == "db" => Some(CompletionContext::DbCallExpression {
            database_name: use_db.clone(),
            db_call_position: position,
        }),
        "member_expression" | "subscript_expression" => {
            if let Some(collection) = collection_of(text, node) {
                return Some(CompletionContext::MemberExpressionOnCollection {
                    database_name: use_db.clone(),
                    collection_name: collection,
                });
            }
            // Deeper chains hang off a call: `db.users.find().sort`.
            let object = node.child_by_field_name("object")?;
            if object.kind() == "call_expression" {
                return analyze_call_chain(text, &object, position, use_db);
            }
            None
        }
        "call_expression" => analyze_call_chain(text, node, position, use_db),
        _ => None,
    }
}

/// Walk a call chain rooted at `db` and classify its trailing access point.
fn analyze_call_chain(
    text: &str,
    call: &Node,
    position: Position,
    use_db: &Option<String>,
) -> Option<CompletionContext> {
    let callee = call.child_by_field_name("function")?;
    if callee.kind() != "member_expression" {
        return None;
    }
    let method_node = callee.child_by_field_name("property")?;
    let method = node_text(text, &method_node);
    let object = callee.child_by_field_name("object")?;

    match method.as_str() {
        "aggregate" => {
            let collection = collection_of(text, &object);
            collection.is_some().then(|| CompletionContext::CursorChain {
                kind: CursorKind::Aggregation,
                database_name: use_db.clone(),
                collection_name: collection,
            })
        }
        "find" => {
            let collection = collection_of(text, &object);
            collection.is_some().then(|| CompletionContext::CursorChain {
                kind: CursorKind::Find,
                database_name: use_db.clone(),
                collection_name: collection,
            })
        }
        "getCollection" if node_text(text, &object) == "db" => {
            let collection = collection_of(text, call)?;
            Some(CompletionContext::MemberExpressionOnCollection {
                database_name: use_db.clone(),
                collection_name: collection,
            })
        }
        _ => {
            // Chained cursor methods recurse to the nearest cursor-returning
            // call: `db.users.find().sort().`.
            if object.kind() == "call_expression" {
                return analyze_call_chain(text, &object, position, use_db);
            }
            let collection = collection_of(text, &object)?;
            Some(CompletionContext::MemberExpressionOnCollection {
                database_name: use_db.clone(),
                collection_name: collection,
            })
        }
    }
}

/// Collection name of a `db`-rooted expression: `db.users`, `db['users']`,
/// or `db.getCollection("users")`.
fn collection_of(text: &str, node: &Node) -> Option<String> {
    match node.kind() {
        "member_expression" => {
            let base = node.child_by_field_name("object")?;
            let property = node.child_by_field_name("property")?;
            (node_text(text, &base) == "db").then(|| node_text(text, &property))
        }
        "subscript_expression" => {
            let base = node.child_by_field_name("object")?;
            let index = node.child_by_field_name("index")?;
            (node_text(text, &base) == "db" && index.kind() == "string")
                .then(|| strip_quotes(&node_text(text, &index)))
        }
        "call_expression" => {
            let callee = node.child_by_field_name("function")?;
            if callee.kind() != "member_expression" {
                return None;
            }
            let base = callee.child_by_field_name("object")?;
            let property = callee.child_by_field_name("property")?;
            if node_text(text, &base) != "db" || node_text(text, &property) != "getCollection" {
                return None;
            }
            let args = node.child_by_field_name("arguments")?;
            let first = args.named_child(0)?;
            (first.kind() == "string").then(|| strip_quotes(&node_text(text, &first)))
        }
        _ => None,
    }
}

fn node_text(text: &str, node: &Node) -> String {
    text.get(node.byte_range()).unwrap_or("").to_string()
}

fn strip_quotes(raw: &str) -> String {
    raw.trim_matches(&['"', '\''][..]).to_string()
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

// ── Textual fallbacks ──────────────────────────────────────────────────────
//
// tree-sitter recovers most incomplete fragments, but unclosed argument
// lists such as `db.products.find({ ` can land the cursor in an ERROR node
// with no usable structure. These scanners keep classification total.

struct OpenFrame {
    delim: u8,
    pos: usize,
    /// For `{` frames: whether the cursor-side slot is a key position.
    key_slot: bool,
}

fn open_frames(text: &str, offset: usize) -> (Vec<OpenFrame>, bool) {
    let bytes = text.as_bytes();
    let offset = offset.min(bytes.len());
    let mut frames: Vec<OpenFrame> = Vec::new();
    let mut in_string: Option<u8> = None;
    let mut i = 0;
    while i < offset {
        let b = bytes[i];
        if let Some(quote) = in_string {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == quote {
                in_string = None;
            }
        } else {
            match b {
                b'"' | b'\'' | b'`' => in_string = Some(b),
                b'(' | b'[' | b'{' => {
                    frames.push(OpenFrame { delim: b, pos: i, key_slot: b == b'{' })
                }
                b')' | b']' | b'}' => {
                    frames.pop();
                }
                b':' => {
                    if let Some(frame) = frames.last_mut()
                        && frame.delim == b'{'
                    {
                        frame.key_slot = false;
                    }
                }
                b',' => {
                    if let Some(frame) = frames.last_mut()
                        && frame.delim == b'{'
                    {
                        frame.key_slot = true;
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    (frames, in_string.is_some())
}

fn fallback_object_key(
    text: &str,
    offset: usize,
    use_db: Option<String>,
) -> Option<CompletionContext> {
    let (frames, in_string) = open_frames(text, offset);
    if in_string {
        return None;
    }
    let top = frames.last()?;
    if top.delim != b'{' || !top.key_slot {
        return None;
    }
    let paren = frames.iter().rev().find(|frame| frame.delim == b'(')?;
    let (collection, _method) = parse_chain_before_paren(&text[..paren.pos])?;

    Some(CompletionContext::ObjectKeyInQuery {
        database_name: use_db,
        collection_name: Some(collection),
    })
}

/// Parse the trailing `db.<collection>.<method>` chain of a text slice
/// ending just before an opening paren.
fn parse_chain_before_paren(prefix: &str) -> Option<(String, String)> {
    let trimmed = prefix.trim_end();
    let (rest, method) = take_trailing_ident(trimmed)?;
    let rest = rest.strip_suffix('.')?;

    if let Some(inner) = rest.strip_suffix(']') {
        // db['my-coll'].<method>
        let open = inner.rfind('[')?;
        let base = &inner[..open];
        if base.trim_end() != "db" && !base.trim_end().ends_with("db") {
            return None;
        }
        if !has_db_boundary(base.trim_end()) {
            return None;
        }
        return Some((strip_quotes(inner[open + 1..].trim()), method));
    }

    let (rest, collection) = take_trailing_ident(rest)?;
    let rest = rest.strip_suffix('.')?;
    let (_, base) = take_trailing_ident(rest)?;
    if base != "db" {
        return None;
    }
    Some((collection, method))
}

fn has_db_boundary(chunk: &str) -> bool {
    if !chunk.ends_with("db") {
        return false;
    }
    let before = chunk.len() - 2;
    before == 0 || !is_ident_byte(chunk.as_bytes()[before - 1])
}

fn take_trailing_ident(text: &str) -> Option<(&str, String)> {
    let bytes = text.as_bytes();
    let mut start = bytes.len();
    while start > 0 && is_ident_byte(bytes[start - 1]) {
        start -= 1;
    }
    if start == bytes.len() {
        return None;
    }
    Some((&text[..start], text[start..].to_string()))
}

fn fallback_use_statement(text: &str, offset: usize) -> bool {
    let (frames, _) = open_frames(text, offset);
    let Some(top) = frames.last() else {
        return false;
    };
    if top.delim != b'(' {
        return false;
    }
    matches!(take_trailing_ident(&text[..top.pos]), Some((rest, ident))
        if ident == "use" && !rest.ends_with('.'))
}

/// Minimal parser-failure fallback for explicit `db.` and `db.<collection>.`
/// chains; operates on the trigger-cleaned text.
fn fallback_member_access(
    text: &str,
    offset: usize,
    removed: bool,
    position: Position,
    use_db: &Option<String>,
) -> Option<CompletionContext> {
    let offset = offset.min(text.len());
    let prefix = text.get(..offset)?;

    let chunk_start = prefix
        .rfind(|c: char| {
            c.is_whitespace() || matches!(c, ';' | ',' | '(' | ')' | '{' | '}' | '=' | '[')
        })
        .map(|idx| idx + 1)
        .unwrap_or(0);
    let chunk = prefix.get(chunk_start..)?.trim();

    if chunk == "db" {
        return removed.then(|| CompletionContext::DbCallExpression {
            database_name: use_db.clone(),
            db_call_position: position,
        });
    }

    let rest = chunk.strip_prefix("db.")?;
    if rest.is_empty() {
        return None;
    }

    match rest.split_once('.') {
        Option::None => {
            if removed && is_bare_ident(rest) {
                // `db.products.` cleaned to `db.products`
                return Some(CompletionContext::MemberExpressionOnCollection {
                    database_name: use_db.clone(),
                    collection_name: rest.to_string(),
                });
            }
            if !removed && is_bare_ident(rest) {
                return Some(CompletionContext::DbCallExpression {
                    database_name: use_db.clone(),
                    db_call_position: position,
                });
            }
            None
        }
        Some((collection, token)) => {
            if !is_bare_ident(collection) || !(token.is_empty() || is_bare_ident(token)) {
                return None;
            }
            Some(CompletionContext::MemberExpressionOnCollection {
                database_name: use_db.clone(),
                collection_name: collection.to_string(),
            })
        }
    }
}

fn is_bare_ident(input: &str) -> bool {
    !input.is_empty() && input.bytes().all(is_ident_byte)
}

// ── Tests ──────────────────────────────────────────────────────────────────
