//! Delimiter-based tokenizer: tab-separated and comma-separated results.
//!
//! Both flavors are record-oriented. A record is one header, data, or control
//! line; suspension granularity is the record, so a chunk boundary inside a
//! record simply retains the partial record until the terminator arrives (or
//! `end()` declares the last record final). CSV records are scanned
//! quote-aware because RFC 4180 allows the record terminator inside a quoted
//! cell.
//!
//! Term syntax:
//! - TSV carries Turtle-style terms: `<iri>`, `"literal"` with optional
//!   `@lang` / `^^<dt>` / `^^prefix:name` suffix, `_:label`, bare booleans and
//!   numerics, backslash string escapes
//! - CSV carries RFC 4180 cells; a cell shaped like `<iri>` or `_:label` keeps
//!   that meaning, anything else is a plain string literal
//! - an empty cell is a null (no value for that column)

use fedstream_protocol::{decode_sequence, ControlFrame, PrefixMap, Result, StreamError};
use fedstream_tabular::{BatchSink, Term, WellKnownDatatypes};

use crate::parser::{Advance, ControlAction, Core, FinishKind, Projection};
use crate::ResultFormat;

enum RecordAction {
    Continue,
    Finished(FinishKind),
}

pub(crate) struct DelimTokenizer {
    format: ResultFormat,
    /// Records fully consumed so far; the record being processed is line + 1.
    line: u64,
    header_done: bool,
    /// Zero variables declared: boolean ask result.
    ask_mode: bool,
    ask_rows: u32,
    projection: Option<Projection>,
}

impl DelimTokenizer {
    pub(crate) fn new(format: ResultFormat) -> Self {
        debug_assert!(matches!(format, ResultFormat::Tsv | ResultFormat::Csv));
        Self {
            format,
            line: 0,
            header_done: false,
            ask_mode: false,
            ask_rows: 0,
            projection: None,
        }
    }

    pub(crate) fn advance<S: BatchSink>(
        &mut self,
        buf: &[u8],
        core: &mut Core<S>,
        final_input: bool,
    ) -> Result<Advance> {
        let mut pos = 0;
        loop {
            if core.terminated() {
                return Ok(Advance::Done);
            }
            let rest = &buf[pos..];
            let Some(consumed) = self.scan_record(rest) else {
                if rest.is_empty() {
                    return Ok(Advance::Done);
                }
                if !final_input {
                    return Ok(Advance::Suspend { resume_from: pos });
                }
                // Last record of the stream, no terminator.
                return match self.process_record(rest, core)? {
                    RecordAction::Continue => Ok(Advance::Done),
                    RecordAction::Finished(kind) => Ok(Advance::Finished(kind)),
                };
            };
            let record = trim_terminator(&rest[..consumed]);
            let action = self.process_record(record, core)?;
            pos += consumed;
            match action {
                RecordAction::Continue => {}
                RecordAction::Finished(FinishKind::CleanEnd) => {
                    if pos < buf.len() {
                        return Err(StreamError::malformed(
                            self.line + 1,
                            1,
                            "Data after !end",
                        ));
                    }
                    return Ok(Advance::Finished(FinishKind::CleanEnd));
                }
                RecordAction::Finished(kind) => return Ok(Advance::Finished(kind)),
            }
        }
    }

    /// Length of the next complete record including its terminator, or `None`
    /// when the buffer ends mid-record.
    fn scan_record(&self, rest: &[u8]) -> Option<usize> {
        match self.format {
            ResultFormat::Tsv => rest.iter().position(|&b| b == b'\n').map(|i| i + 1),
            ResultFormat::Csv => {
                let mut in_quotes = false;
                for (i, &b) in rest.iter().enumerate() {
                    match b {
                        b'"' => in_quotes = !in_quotes,
                        b'\n' if !in_quotes => return Some(i + 1),
                        _ => {}
                    }
                }
                None
            }
            ResultFormat::Json => None,
        }
    }

    fn process_record<S: BatchSink>(
        &mut self,
        record: &[u8],
        core: &mut Core<S>,
    ) -> Result<RecordAction> {
        self.line += 1;
        let text = std::str::from_utf8(record)
            .map_err(|_| StreamError::malformed(self.line, 1, "Invalid UTF-8 in record"))?;

        if text.starts_with('!') {
            let frame = ControlFrame::parse(text, self.line)?;
            return match core.handle_control(frame)? {
                ControlAction::Continue => Ok(RecordAction::Continue),
                ControlAction::EndOfStream => Ok(RecordAction::Finished(FinishKind::CleanEnd)),
                ControlAction::CancelAcknowledged => {
                    Ok(RecordAction::Finished(FinishKind::Cancelled))
                }
            };
        }

        if !self.header_done {
            self.parse_header(text, core)?;
            return Ok(RecordAction::Continue);
        }
        if self.ask_mode {
            self.ask_line(text, core)?;
            return Ok(RecordAction::Continue);
        }
        self.data_record(text, core)?;
        Ok(RecordAction::Continue)
    }

    fn parse_header<S: BatchSink>(&mut self, text: &str, core: &mut Core<S>) -> Result<()> {
        self.header_done = true;
        if text.is_empty() {
            self.ask_mode = true;
            return Ok(());
        }
        let cells = self.split_cells(text)?;
        let mut names = Vec::with_capacity(cells.len());
        for (offset, raw) in cells {
            let col = offset as u64 + 1;
            let bare = if raw.starts_with('"') {
                match self.format {
                    ResultFormat::Csv => unquote_csv(raw, self.line, col)?,
                    _ => {
                        let (content, suffix) = take_quoted(raw, self.line, col)?;
                        if !suffix.is_empty() {
                            return Err(StreamError::malformed(
                                self.line,
                                col,
                                "Unexpected characters after quoted variable name",
                            ));
                        }
                        content
                    }
                }
            } else {
                raw.to_string()
            };
            let name = bare
                .strip_prefix(['?', '$'])
                .map(str::to_string)
                .unwrap_or(bare);
            if name.is_empty() {
                return Err(StreamError::malformed(self.line, col, "Empty variable name"));
            }
            names.push(name);
        }
        self.projection = Some(Projection::new(&names, core.vars()));
        Ok(())
    }

    fn ask_line<S: BatchSink>(&mut self, text: &str, core: &mut Core<S>) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        if self.ask_rows > 0 {
            return Err(StreamError::malformed(
                self.line,
                1,
                "More than one row in a boolean result",
            ));
        }
        self.ask_rows = 1;
        let bare = text.trim_matches('"');
        match bare {
            "true" => core.emit_ask_row(),
            "false" => Ok(()),
            _ => Err(StreamError::malformed(
                self.line,
                1,
                format!("Invalid boolean result value {:?}", text),
            )),
        }
    }

    fn data_record<S: BatchSink>(&self, text: &str, core: &mut Core<S>) -> Result<()> {
        let Some(projection) = self.projection.as_ref() else {
            return Err(StreamError::malformed(self.line, 1, "Row before header"));
        };
        let cells = self.split_cells(text)?;
        if cells.len() < projection.width() {
            return Err(StreamError::malformed(
                self.line,
                text.len() as u64 + 1,
                format!(
                    "Missing columns: expected {}, found {}",
                    projection.width(),
                    cells.len()
                ),
            ));
        }
        if cells.len() > projection.width() {
            return Err(StreamError::malformed(
                self.line,
                text.len() as u64 + 1,
                format!(
                    "Extra columns: expected {}, found {}",
                    projection.width(),
                    cells.len()
                ),
            ));
        }

        core.begin_row()?;
        for (wire_col, (offset, raw)) in cells.into_iter().enumerate() {
            if raw.is_empty() {
                continue;
            }
            let col = offset as u64 + 1;
            let term = match self.format {
                ResultFormat::Tsv => {
                    parse_tsv_term(raw, core.prefixes(), core.datatypes(), self.line, col)?
                }
                _ => parse_csv_term(raw, self.line, col)?,
            };
            if projection.is_seq_column(wire_col) {
                let lexical = term.lexical().ok_or_else(|| {
                    StreamError::malformed(self.line, col, "Sequence column must be a literal")
                })?;
                let seq = decode_sequence(lexical)?;
                core.apply_sequence(seq)?;
            } else if let Some(out) = projection.output_column(wire_col) {
                core.put(out, term)?;
            }
        }
        core.commit_row()
    }

    /// Split a record into `(byte offset, raw cell)` pairs.
    fn split_cells<'a>(&self, text: &'a str) -> Result<Vec<(usize, &'a str)>> {
        match self.format {
            ResultFormat::Tsv => {
                let mut cells = Vec::new();
                let mut start = 0;
                for (i, b) in text.bytes().enumerate() {
                    if b == b'\t' {
                        cells.push((start, &text[start..i]));
                        start = i + 1;
                    }
                }
                cells.push((start, &text[start..]));
                Ok(cells)
            }
            _ => {
                let mut cells = Vec::new();
                let mut start = 0;
                let mut in_quotes = false;
                for (i, b) in text.bytes().enumerate() {
                    match b {
                        b'"' => in_quotes = !in_quotes,
                        b',' if !in_quotes => {
                            cells.push((start, &text[start..i]));
                            start = i + 1;
                        }
                        _ => {}
                    }
                }
                if in_quotes {
                    return Err(StreamError::malformed(
                        self.line,
                        start as u64 + 1,
                        "Unterminated quoted cell",
                    ));
                }
                cells.push((start, &text[start..]));
                Ok(cells)
            }
        }
    }
}

/// Strip the record terminator: `\n`, optionally preceded by `\r`.
fn trim_terminator(record: &[u8]) -> &[u8] {
    let record = record.strip_suffix(b"\n").unwrap_or(record);
    record.strip_suffix(b"\r").unwrap_or(record)
}

/// Parse one TSV cell into a term.
fn parse_tsv_term(
    raw: &str,
    prefixes: &PrefixMap,
    datatypes: &WellKnownDatatypes,
    line: u64,
    col: u64,
) -> Result<Term> {
    if let Some(rest) = raw.strip_prefix('<') {
        let iri = rest.strip_suffix('>').ok_or_else(|| {
            StreamError::malformed(line, col, format!("Unterminated IRI {:?}", raw))
        })?;
        return Ok(Term::iri(iri));
    }
    if raw.starts_with('"') {
        let (content, suffix) = take_quoted(raw, line, col)?;
        if suffix.is_empty() {
            return Ok(Term::literal(content));
        }
        if let Some(lang) = suffix.strip_prefix('@') {
            if lang.is_empty() {
                return Err(StreamError::malformed(line, col, "Empty language tag"));
            }
            return Ok(Term::literal_lang(content, lang));
        }
        if let Some(dt) = suffix.strip_prefix("^^") {
            if let Some(inner) = dt.strip_prefix('<') {
                let iri = inner.strip_suffix('>').ok_or_else(|| {
                    StreamError::malformed(line, col, "Unterminated datatype IRI")
                })?;
                return Ok(Term::literal_typed(content, iri));
            }
            let iri = prefixes.expand(dt).ok_or_else(|| {
                StreamError::malformed(line, col, format!("Unknown datatype prefix in {:?}", dt))
            })?;
            return Ok(Term::literal_typed(content, iri));
        }
        return Err(StreamError::malformed(
            line,
            col,
            format!("Unexpected characters after literal: {:?}", suffix),
        ));
    }
    if let Some(label) = raw.strip_prefix("_:") {
        if label.is_empty() {
            return Err(StreamError::malformed(line, col, "Empty blank node label"));
        }
        return Ok(Term::bnode(label));
    }
    if raw == "true" || raw == "false" {
        return Ok(Term::Literal {
            lexical: raw.into(),
            lang: None,
            datatype: Some(std::sync::Arc::clone(&datatypes.xsd_boolean)),
        });
    }
    if looks_numeric(raw) {
        return Ok(Term::Literal {
            lexical: raw.into(),
            lang: None,
            datatype: Some(datatypes.numeric_datatype(raw)),
        });
    }
    Err(StreamError::malformed(
        line,
        col,
        format!("Invalid term {:?}", raw),
    ))
}

/// Parse one CSV cell into a term. CSV is lossy: everything that is not an
/// IRI or blank node is a plain string literal.
fn parse_csv_term(raw: &str, line: u64, col: u64) -> Result<Term> {
    let content = if raw.starts_with('"') {
        unquote_csv(raw, line, col)?
    } else {
        raw.to_string()
    };
    if let Some(rest) = content.strip_prefix('<') {
        if let Some(iri) = rest.strip_suffix('>') {
            return Ok(Term::iri(iri));
        }
    }
    if let Some(label) = content.strip_prefix("_:") {
        if !label.is_empty() {
            return Ok(Term::bnode(label));
        }
    }
    Ok(Term::literal(content))
}

/// Consume a leading quoted string with backslash escapes, returning the
/// unescaped content and whatever follows the closing quote.
fn take_quoted(raw: &str, line: u64, col: u64) -> Result<(String, &str)> {
    debug_assert!(raw.starts_with('"'));
    let inner = &raw[1..];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((out, &inner[i + 1..])),
            '\\' => {
                let (_, esc) = chars.next().ok_or_else(|| {
                    StreamError::malformed(line, col, "Dangling escape at end of literal")
                })?;
                match esc {
                    't' => out.push('\t'),
                    'n' => out.push('\n'),
                    'r' => out.push('\r'),
                    'b' => out.push('\u{0008}'),
                    'f' => out.push('\u{000C}'),
                    '"' => out.push('"'),
                    '\'' => out.push('\''),
                    '\\' => out.push('\\'),
                    'u' => out.push(read_unicode_escape(&mut chars, 4, line, col)?),
                    'U' => out.push(read_unicode_escape(&mut chars, 8, line, col)?),
                    other => {
                        return Err(StreamError::malformed(
                            line,
                            col,
                            format!("Invalid escape sequence \\{}", other),
                        ))
                    }
                }
            }
            c => out.push(c),
        }
    }
    Err(StreamError::malformed(
        line,
        col,
        "Unterminated quoted literal",
    ))
}

fn read_unicode_escape(
    chars: &mut std::str::CharIndices<'_>,
    digits: u32,
    line: u64,
    col: u64,
) -> Result<char> {
    let mut value: u32 = 0;
    for _ in 0..digits {
        let (_, c) = chars.next().ok_or_else(|| {
            StreamError::malformed(line, col, "Truncated unicode escape")
        })?;
        let digit = c.to_digit(16).ok_or_else(|| {
            StreamError::malformed(line, col, format!("Invalid unicode escape digit {:?}", c))
        })?;
        value = value * 16 + digit;
    }
    char::from_u32(value)
        .ok_or_else(|| StreamError::malformed(line, col, "Invalid unicode code point in escape"))
}

/// Unquote an RFC 4180 cell: outer quotes stripped, `""` collapses to `"`.
fn unquote_csv(raw: &str, line: u64, col: u64) -> Result<String> {
    let inner = raw
        .strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
        .ok_or_else(|| StreamError::malformed(line, col, "Unterminated quoted cell"))?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '"' {
            match chars.next() {
                Some('"') => out.push('"'),
                _ => {
                    return Err(StreamError::malformed(
                        line,
                        col,
                        "Stray quote inside quoted cell",
                    ))
                }
            }
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

fn looks_numeric(raw: &str) -> bool {
    let rest = raw.strip_prefix(['+', '-']).unwrap_or(raw);
    if rest.is_empty() || !rest.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
        return false;
    }
    raw.parse::<f64>().is_ok()
}
