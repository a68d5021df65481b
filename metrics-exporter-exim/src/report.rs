//! The eximstats report model.
//!
//! An eximstats HTML report is a sequence of sections, each introduced by a named anchor
//! (`<a name="Transport">`) and followed by a table. [`Report::parse`] lifts those tables out of
//! the markup as plain rows of cell text, and does nothing else: which column holds what is decided
//! per section by the extraction rules in [`sections`](crate::sections).
use std::borrow::Cow;

use indexmap::IndexMap;

/// One table row: cell text in column order.
pub type Row = Vec<String>;

/// A named table lifted out of a report section.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Table {
    name: String,
    rows: Vec<Row>,
}

impl Table {
    /// Creates a table from already-split rows. Header rows must not be included.
    pub fn new<N: Into<String>>(name: N, rows: Vec<Row>) -> Self {
        Self { name: name.into(), rows }
    }

    /// Anchor name of the section this table belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Data rows, in report order, without the header row.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Returns `true` if the section was present but listed nothing.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A parsed report.
///
/// Sections can appear in any order and any of them may be missing: eximstats leaves out
/// sections that would be empty.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Report {
    tables: IndexMap<String, Table>,
    dangling: Vec<String>,
}

impl Report {
    /// Parses the HTML output of `eximstats -html`.
    ///
    /// Parsing never fails. Markup that does not look like a section simply contributes nothing,
    /// so a truncated or garbled report yields fewer tables rather than an error.
    pub fn parse(raw: &str) -> Report {
        let mut report = Report::default();
        let mut pending_anchor: Option<String> = None;
        let mut current: Option<TableBuilder> = None;

        for token in Tokenizer::new(raw) {
            match token {
                Token::Open { name: "a", attrs } => {
                    let Some(anchor) = attribute(attrs, "name") else { continue };
                    if let Some(builder) = current.take() {
                        // The previous table was never closed.
                        report.insert(builder.finish());
                    }
                    if let Some(previous) = pending_anchor.replace(anchor) {
                        report.dangling.push(previous);
                    }
                }
                Token::Open { name: "table", .. } => match current.as_mut() {
                    Some(builder) => builder.begin_nested(),
                    None => {
                        if let Some(anchor) = pending_anchor.take() {
                            current = Some(TableBuilder::new(anchor));
                        }
                    }
                },
                Token::Close { name: "table" } => {
                    if let Some(builder) = current.as_mut() {
                        builder.end_row();
                        if builder.depth == 0 {
                            if let Some(builder) = current.take() {
                                report.insert(builder.finish());
                            }
                        } else {
                            builder.depth -= 1;
                        }
                    }
                }
                Token::Open { name: "tr", .. } | Token::Close { name: "tr" } => {
                    if let Some(builder) = current.as_mut() {
                        builder.end_row();
                    }
                }
                Token::Open { name: name @ ("td" | "th"), .. } => {
                    if let Some(builder) = current.as_mut() {
                        builder.start_cell(name == "th");
                    }
                }
                Token::Close { name: "td" | "th" } => {
                    if let Some(builder) = current.as_mut() {
                        builder.end_cell();
                    }
                }
                Token::Open { name: "br", .. } => {
                    if let Some(builder) = current.as_mut() {
                        builder.push_text(" ");
                    }
                }
                Token::Text(text) => {
                    if let Some(builder) = current.as_mut() {
                        builder.push_text(text);
                    }
                }
                _ => {}
            }
        }

        if let Some(builder) = current.take() {
            report.insert(builder.finish());
        }
        if let Some(anchor) = pending_anchor.take() {
            report.dangling.push(anchor);
        }

        report
    }

    fn insert(&mut self, table: Table) {
        // A repeated anchor keeps its first table.
        if !self.tables.contains_key(&table.name) {
            self.tables.insert(table.name.clone(), table);
        }
    }

    /// Looks up the table of a section by its anchor name.
    pub fn table(&self, section: &str) -> Option<&Table> {
        self.tables.get(section)
    }

    /// Returns `true` if the section's anchor was found but no table followed it.
    pub fn is_dangling(&self, section: &str) -> bool {
        !self.tables.contains_key(section) && self.dangling.iter().any(|a| a == section)
    }

    /// Anchor names of all sections that carried a table, in report order.
    pub fn sections(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Returns `true` if no section with a table was found.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

struct Cell {
    header: bool,
    text: String,
}

struct TableBuilder {
    name: String,
    depth: usize,
    rows: Vec<Row>,
    row: Vec<Cell>,
    cell: Option<Cell>,
}

impl TableBuilder {
    fn new(name: String) -> Self {
        Self { name, depth: 0, rows: Vec::new(), row: Vec::new(), cell: None }
    }

    fn start_cell(&mut self, header: bool) {
        self.end_cell();
        self.cell = Some(Cell { header, text: String::new() });
    }

    fn push_text(&mut self, text: &str) {
        if let Some(cell) = self.cell.as_mut() {
            cell.text.push_str(text);
        }
    }

    fn end_cell(&mut self) {
        if let Some(cell) = self.cell.take() {
            self.row.push(cell);
        }
    }

    fn begin_nested(&mut self) {
        // The outer row only exists to lay out the inner table; drop it.
        self.cell = None;
        self.row.clear();
        self.depth += 1;
    }

    fn end_row(&mut self) {
        self.end_cell();
        let row = std::mem::take(&mut self.row);
        // Rows made only of <th> cells are headers.
        if row.iter().all(|cell| cell.header) {
            return;
        }
        let row = row.into_iter().map(|cell| cell_text(&cell.text)).collect::<Row>();
        if row.iter().all(String::is_empty) {
            return;
        }
        self.rows.push(row);
    }

    fn finish(mut self) -> Table {
        self.end_row();
        Table { name: self.name, rows: self.rows }
    }
}

#[derive(Debug, PartialEq)]
enum Token<'a> {
    Open { name: &'a str, attrs: &'a str },
    Close { name: &'a str },
    Text(&'a str),
}

/// A forgiving tokenizer for the small subset of HTML eximstats emits.
///
/// Tags the parser has no use for come back with an empty name.
struct Tokenizer<'a> {
    rest: &'a str,
}

impl<'a> Tokenizer<'a> {
    fn new(raw: &'a str) -> Self {
        Self { rest: raw }
    }
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        loop {
            if self.rest.is_empty() {
                return None;
            }

            if let Some(after) = self.rest.strip_prefix("<!--") {
                self.rest = after.find("-->").map_or("", |end| &after[end + 3..]);
                continue;
            }

            if !self.rest.starts_with('<') {
                let end = self.rest.find('<').unwrap_or(self.rest.len());
                let (text, rest) = self.rest.split_at(end);
                self.rest = rest;
                return Some(Token::Text(text));
            }

            match split_tag(self.rest) {
                Some((token, rest)) => {
                    self.rest = rest;
                    return Some(token);
                }
                None => {
                    // A lone '<' that does not start a tag, as in "<user@host>".
                    let (text, rest) = self.rest.split_at(1);
                    self.rest = rest;
                    return Some(Token::Text(text));
                }
            }
        }
    }
}

fn split_tag(input: &str) -> Option<(Token<'_>, &str)> {
    let end = input.find('>')?;
    let inner = &input[1..end];
    let rest = &input[end + 1..];

    if inner.starts_with('!') || inner.starts_with('?') {
        // Doctype or processing instruction.
        return Some((Token::Text(""), rest));
    }

    let (closing, inner) = match inner.strip_prefix('/') {
        Some(inner) => (true, inner),
        None => (false, inner),
    };
    let name_end = inner
        .find(|c: char| c.is_whitespace() || c == '/')
        .unwrap_or(inner.len());
    let name = &inner[..name_end];
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    let name = known_tag(name);

    let token = if closing {
        Token::Close { name }
    } else {
        Token::Open { name, attrs: &inner[name_end..] }
    };
    Some((token, rest))
}

fn known_tag(name: &str) -> &'static str {
    const KNOWN: [&str; 6] = ["a", "table", "tr", "td", "th", "br"];
    KNOWN.iter().find(|known| known.eq_ignore_ascii_case(name)).copied().unwrap_or("")
}

/// Finds an attribute value in the attribute part of a tag, matching the key case-insensitively.
fn attribute(attrs: &str, wanted: &str) -> Option<String> {
    let mut rest = attrs;
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '/');
        if rest.is_empty() {
            return None;
        }

        let key_end = rest.find(|c: char| c == '=' || c.is_whitespace() || c == '/').unwrap_or(rest.len());
        let key = &rest[..key_end];
        rest = rest[key_end..].trim_start();

        let value = match rest.strip_prefix('=') {
            Some(after) => {
                let after = after.trim_start();
                match after.chars().next() {
                    Some(quote @ ('"' | '\'')) => {
                        let body = &after[1..];
                        let end = body.find(quote).unwrap_or(body.len());
                        rest = body.get(end + 1..).unwrap_or("");
                        &body[..end]
                    }
                    _ => {
                        let end = after.find(char::is_whitespace).unwrap_or(after.len());
                        rest = &after[end..];
                        after[..end].trim_end_matches('/')
                    }
                }
            }
            None => "",
        };

        if key.eq_ignore_ascii_case(wanted) {
            return Some(decode_entities(value).into_owned());
        }
    }
}

/// Interior whitespace is kept as emitted, since it is part of the label values derived from it.
fn cell_text(text: &str) -> String {
    decode_entities(text).trim().to_owned()
}

fn decode_entities(text: &str) -> Cow<'_, str> {
    if !text.contains('&') {
        return Cow::Borrowed(text);
    }

    let mut decoded = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        decoded.push_str(&rest[..start]);
        rest = &rest[start..];

        let entity = rest[1..]
            .find(';')
            .filter(|end| *end <= 8)
            .and_then(|end| decode_entity(&rest[1..1 + end]).map(|c| (c, end + 2)));
        match entity {
            Some((c, consumed)) => {
                decoded.push(c);
                rest = &rest[consumed..];
            }
            None => {
                decoded.push('&');
                rest = &rest[1..];
            }
        }
    }
    decoded.push_str(rest);

    Cow::Owned(decoded)
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let code = entity.strip_prefix('#')?;
            let value = match code.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => code.parse().ok()?,
            };
            char::from_u32(value)
        }
    }
}
