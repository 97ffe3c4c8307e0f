//! Streaming tokenizer for the SPARQL JSON results dialect.
//!
//! Two parallel explicit stacks, pushed and popped in lockstep:
//!
//! - a **syntax** stack tracking raw JSON position (object phase, array
//!   phase), and
//! - a **semantics** stack tracking result-document position (`Root`,
//!   `Head`, `Vars`, `Boolean`, `Results`, `Bindings`, `BindingRow`,
//!   `BindingValue` and its part fields, plus `Ignore` for tolerated unknown
//!   properties).
//!
//! Suspension across chunk boundaries only requires retaining the unconsumed
//! byte tail: both stacks and the small scalar buffers are plain state, no
//! continuation capture. A lexical token that is incomplete at the end of the
//! buffer (an open string, a number that might continue) suspends from the
//! token start and is re-scanned when more bytes arrive.
//!
//! A binding value's term is only materialized when its enclosing object
//! closes, from the four buffered parts (`type`, `datatype`, `value`,
//! `xml:lang`); a part without `type` is a hard error. The `boolean` field is
//! tolerated as a JSON boolean, a `"true"`/`"false"` string, or legacy `0`/`1`.

use fedstream_protocol::{decode_sequence, ControlFrame, Result, StreamError};
use fedstream_tabular::{BatchSink, Term};

use crate::parser::{Advance, ControlAction, Core, FinishKind, Projection};

/// Lexical token.
enum Tok {
    ObjBegin,
    ObjEnd,
    ArrBegin,
    ArrEnd,
    Comma,
    Colon,
    Str(String),
    Num(f64),
    Bool(bool),
    Null,
}

/// Raw JSON syntax frame.
enum SynFrame {
    Object {
        phase: ObjPhase,
        /// The current field's value pops one semantic frame when complete.
        field_owns: bool,
        /// Closing this object pops one semantic frame.
        pops_sem: bool,
    },
    Array {
        expect_value: bool,
        any_elements: bool,
        pops_sem: bool,
    },
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ObjPhase {
    KeyOrEnd,
    Colon,
    Value,
    CommaOrEnd,
}

/// Binding-value part fields.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Part {
    Type,
    Datatype,
    Value,
    Lang,
}

/// Where the current binding value lands.
#[derive(Clone, Copy)]
enum Target {
    Seq,
    Out(usize),
    Drop,
}

/// Result-document semantic frame.
enum SemFrame {
    Root,
    Head,
    Vars,
    Boolean,
    Results,
    Bindings,
    BindingRow,
    BindingValue(Target),
    ValueField(Part),
    Ignore,
}

pub(crate) struct JsonTokenizer {
    syntax: Vec<SynFrame>,
    semantic: Vec<SemFrame>,
    started: bool,
    finished: bool,
    line: u64,
    col: u64,
    wire_vars: Vec<String>,
    vars_declared: bool,
    projection: Option<Projection>,
    part_type: Option<String>,
    part_value: Option<String>,
    part_datatype: Option<String>,
    part_lang: Option<String>,
}

impl JsonTokenizer {
    pub(crate) fn new() -> Self {
        Self {
            syntax: Vec::new(),
            semantic: vec![SemFrame::Root],
            started: false,
            finished: false,
            line: 1,
            col: 1,
            wire_vars: Vec::new(),
            vars_declared: false,
            projection: None,
            part_type: None,
            part_value: None,
            part_datatype: None,
            part_lang: None,
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
            self.skip_ws(buf, &mut pos);
            if pos >= buf.len() {
                if final_input && !self.finished {
                    return Err(self.err("Unexpected end of input in result document"));
                }
                return Ok(Advance::Done);
            }
            if self.finished {
                return Err(self.err("Data after result document"));
            }
            let start = pos;
            let Some(tok) = self.lex(buf, &mut pos, final_input)? else {
                return Ok(Advance::Suspend { resume_from: start });
            };
            if let Some(kind) = self.apply(tok, core)? {
                if matches!(kind, FinishKind::CleanEnd) {
                    self.skip_ws(buf, &mut pos);
                    if pos < buf.len() {
                        return Err(self.err("Data after result document"));
                    }
                }
                return Ok(Advance::Finished(kind));
            }
        }
    }

    fn err(&self, message: impl Into<String>) -> StreamError {
        StreamError::malformed(self.line, self.col, message)
    }

    /// Advance line/column bookkeeping over consumed bytes.
    fn bump(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if b == b'\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
    }

    fn skip_ws(&mut self, buf: &[u8], pos: &mut usize) {
        let start = *pos;
        while *pos < buf.len() && matches!(buf[*pos], b' ' | b'\t' | b'\r' | b'\n') {
            *pos += 1;
        }
        if *pos > start {
            let consumed = &buf[start..*pos];
            self.bump(consumed);
        }
    }

    // =========================================================================
    // Lexer
    // =========================================================================

    /// Scan one token. Returns `None` when the buffer ends mid-token (the
    /// caller suspends from the token start).
    fn lex(&mut self, buf: &[u8], pos: &mut usize, final_input: bool) -> Result<Option<Tok>> {
        let b = buf[*pos];
        let single = match b {
            b'{' => Some(Tok::ObjBegin),
            b'}' => Some(Tok::ObjEnd),
            b'[' => Some(Tok::ArrBegin),
            b']' => Some(Tok::ArrEnd),
            b',' => Some(Tok::Comma),
            b':' => Some(Tok::Colon),
            _ => None,
        };
        if let Some(tok) = single {
            *pos += 1;
            self.col += 1;
            return Ok(Some(tok));
        }
        match b {
            b'"' => self.lex_string(buf, pos, final_input),
            b't' => self.lex_keyword(buf, pos, b"true", Tok::Bool(true), final_input),
            b'f' => self.lex_keyword(buf, pos, b"false", Tok::Bool(false), final_input),
            b'n' => self.lex_keyword(buf, pos, b"null", Tok::Null, final_input),
            b'-' | b'0'..=b'9' => self.lex_number(buf, pos, final_input),
            other => Err(self.err(format!("Unexpected character {:?}", other as char))),
        }
    }

    fn lex_keyword(
        &mut self,
        buf: &[u8],
        pos: &mut usize,
        word: &[u8],
        tok: Tok,
        final_input: bool,
    ) -> Result<Option<Tok>> {
        let rest = &buf[*pos..];
        if rest.len() < word.len() {
            if word.starts_with(rest) && !final_input {
                return Ok(None);
            }
            return Err(self.err("Invalid token"));
        }
        if &rest[..word.len()] != word {
            return Err(self.err("Invalid token"));
        }
        *pos += word.len();
        self.col += word.len() as u64;
        Ok(Some(tok))
    }

    fn lex_number(&mut self, buf: &[u8], pos: &mut usize, final_input: bool) -> Result<Option<Tok>> {
        let start = *pos;
        let mut end = *pos;
        while end < buf.len()
            && matches!(buf[end], b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E')
        {
            end += 1;
        }
        if end == buf.len() && !final_input {
            // The number might continue in the next chunk.
            return Ok(None);
        }
        let text = std::str::from_utf8(&buf[start..end])
            .map_err(|_| self.err("Invalid number"))?;
        let value: f64 = text
            .parse()
            .map_err(|_| self.err(format!("Invalid number {:?}", text)))?;
        *pos = end;
        self.col += (end - start) as u64;
        Ok(Some(Tok::Num(value)))
    }

    fn lex_string(&mut self, buf: &[u8], pos: &mut usize, final_input: bool) -> Result<Option<Tok>> {
        let start = *pos;
        let mut i = *pos + 1;
        let mut out = String::new();
        let mut pending_high: Option<u16> = None;
        loop {
            if i >= buf.len() {
                if final_input {
                    return Err(self.err("Unterminated string"));
                }
                return Ok(None);
            }
            let b = buf[i];
            match b {
                b'"' => {
                    if pending_high.is_some() {
                        return Err(self.err("Unpaired surrogate in string escape"));
                    }
                    i += 1;
                    let consumed = &buf[start..i];
                    *pos = i;
                    self.bump(consumed);
                    return Ok(Some(Tok::Str(out)));
                }
                b'\\' => {
                    if i + 1 >= buf.len() {
                        if final_input {
                            return Err(self.err("Unterminated string escape"));
                        }
                        return Ok(None);
                    }
                    let esc = buf[i + 1];
                    let simple = match esc {
                        b'"' => Some('"'),
                        b'\\' => Some('\\'),
                        b'/' => Some('/'),
                        b'b' => Some('\u{0008}'),
                        b'f' => Some('\u{000C}'),
                        b'n' => Some('\n'),
                        b'r' => Some('\r'),
                        b't' => Some('\t'),
                        _ => None,
                    };
                    if let Some(c) = simple {
                        if pending_high.is_some() {
                            return Err(self.err("Unpaired surrogate in string escape"));
                        }
                        out.push(c);
                        i += 2;
                        continue;
                    }
                    if esc != b'u' {
                        return Err(self.err(format!(
                            "Invalid string escape \\{}",
                            esc as char
                        )));
                    }
                    if i + 6 > buf.len() {
                        if final_input {
                            return Err(self.err("Truncated unicode escape"));
                        }
                        return Ok(None);
                    }
                    let hex = std::str::from_utf8(&buf[i + 2..i + 6])
                        .ok()
                        .and_then(|h| u16::from_str_radix(h, 16).ok())
                        .ok_or_else(|| self.err("Invalid unicode escape"))?;
                    i += 6;
                    match pending_high.take() {
                        Some(high) => {
                            if !(0xDC00..=0xDFFF).contains(&hex) {
                                return Err(self.err("Unpaired surrogate in string escape"));
                            }
                            let c = 0x10000
                                + ((high as u32 - 0xD800) << 10)
                                + (hex as u32 - 0xDC00);
                            let c = char::from_u32(c)
                                .ok_or_else(|| self.err("Invalid surrogate pair"))?;
                            out.push(c);
                        }
                        None if (0xD800..=0xDBFF).contains(&hex) => {
                            pending_high = Some(hex);
                        }
                        None if (0xDC00..=0xDFFF).contains(&hex) => {
                            return Err(self.err("Unpaired surrogate in string escape"));
                        }
                        None => {
                            let c = char::from_u32(hex as u32)
                                .ok_or_else(|| self.err("Invalid unicode escape"))?;
                            out.push(c);
                        }
                    }
                }
                _ => {
                    if pending_high.is_some() {
                        return Err(self.err("Unpaired surrogate in string escape"));
                    }
                    // Multi-byte UTF-8 is passed through; validate at the end
                    // of the sequence boundaries only.
                    let len = utf8_len(b);
                    if i + len > buf.len() {
                        if final_input {
                            return Err(self.err("Truncated UTF-8 sequence in string"));
                        }
                        return Ok(None);
                    }
                    let s = std::str::from_utf8(&buf[i..i + len])
                        .map_err(|_| self.err("Invalid UTF-8 in string"))?;
                    out.push_str(s);
                    i += len;
                }
            }
        }
    }

    // =========================================================================
    // Dual-stack machine
    // =========================================================================

    fn apply<S: BatchSink>(&mut self, tok: Tok, core: &mut Core<S>) -> Result<Option<FinishKind>> {
        if self.syntax.is_empty() {
            return match tok {
                Tok::ObjBegin if !self.started => {
                    self.started = true;
                    // The root object's close pops the Root semantic frame.
                    self.syntax.push(SynFrame::Object {
                        phase: ObjPhase::KeyOrEnd,
                        field_owns: false,
                        pops_sem: true,
                    });
                    Ok(None)
                }
                _ => Err(self.err("Expected result document object")),
            };
        }

        enum Position {
            ObjectKeyOrEnd,
            ObjectColon,
            ObjectValue(bool),
            ObjectCommaOrEnd,
            ArrayValue(bool),
            ArrayCommaOrEnd,
        }

        let position = match self
            .syntax
            .last_mut()
            .ok_or_else(|| StreamError::violation("Internal: empty syntax stack"))?
        {
            SynFrame::Object {
                phase, field_owns, ..
            } => match phase {
                ObjPhase::KeyOrEnd => Position::ObjectKeyOrEnd,
                ObjPhase::Colon => Position::ObjectColon,
                ObjPhase::Value => {
                    let owns = *field_owns;
                    *field_owns = false;
                    *phase = ObjPhase::CommaOrEnd;
                    Position::ObjectValue(owns)
                }
                ObjPhase::CommaOrEnd => Position::ObjectCommaOrEnd,
            },
            SynFrame::Array {
                expect_value,
                any_elements,
                ..
            } => {
                if *expect_value {
                    let first = !*any_elements;
                    *expect_value = false;
                    *any_elements = true;
                    Position::ArrayValue(first)
                } else {
                    Position::ArrayCommaOrEnd
                }
            }
        };

        match position {
            Position::ObjectKeyOrEnd => match tok {
                Tok::Str(key) => {
                    let owns = self.on_key(&key)?;
                    if let Some(SynFrame::Object {
                        phase, field_owns, ..
                    }) = self.syntax.last_mut()
                    {
                        *phase = ObjPhase::Colon;
                        *field_owns = owns;
                    }
                    Ok(None)
                }
                Tok::ObjEnd => self.close_container(core),
                _ => Err(self.err("Expected property name or '}'")),
            },
            Position::ObjectColon => match tok {
                Tok::Colon => {
                    if let Some(SynFrame::Object { phase, .. }) = self.syntax.last_mut() {
                        *phase = ObjPhase::Value;
                    }
                    Ok(None)
                }
                _ => Err(self.err("Expected ':'")),
            },
            Position::ObjectValue(owns) => self.value(tok, owns, false, core),
            Position::ObjectCommaOrEnd => match tok {
                Tok::Comma => {
                    if let Some(SynFrame::Object { phase, .. }) = self.syntax.last_mut() {
                        *phase = ObjPhase::KeyOrEnd;
                    }
                    Ok(None)
                }
                Tok::ObjEnd => self.close_container(core),
                _ => Err(self.err("Expected ',' or '}'")),
            },
            Position::ArrayValue(first) => {
                if first {
                    if let Tok::ArrEnd = tok {
                        return self.close_container(core);
                    }
                }
                match tok {
                    Tok::ArrEnd => Err(self.err("Trailing comma in array")),
                    tok => self.element(tok, core),
                }
            }
            Position::ArrayCommaOrEnd => match tok {
                Tok::Comma => {
                    if let Some(SynFrame::Array { expect_value, .. }) = self.syntax.last_mut() {
                        *expect_value = true;
                    }
                    Ok(None)
                }
                Tok::ArrEnd => self.close_container(core),
                _ => Err(self.err("Expected ',' or ']'")),
            },
        }
    }

    /// A property name was read; push the semantic frame its value belongs
    /// to. Returns whether the value's completion pops that frame.
    fn on_key(&mut self, key: &str) -> Result<bool> {
        enum KeyCtx {
            Root,
            Head,
            Results,
            BindingRow,
            BindingValue,
            Ignore,
        }
        let ctx = match self.semantic.last() {
            Some(SemFrame::Root) => KeyCtx::Root,
            Some(SemFrame::Head) => KeyCtx::Head,
            Some(SemFrame::Results) => KeyCtx::Results,
            Some(SemFrame::BindingRow) => KeyCtx::BindingRow,
            Some(SemFrame::BindingValue(_)) => KeyCtx::BindingValue,
            Some(SemFrame::Ignore) => KeyCtx::Ignore,
            _ => return Err(self.err(format!("Unexpected property {:?}", key))),
        };
        match ctx {
            KeyCtx::Root => {
                if key.eq_ignore_ascii_case("head") {
                    self.semantic.push(SemFrame::Head);
                } else if key.eq_ignore_ascii_case("results") {
                    self.semantic.push(SemFrame::Results);
                } else if key.eq_ignore_ascii_case("boolean") {
                    self.semantic.push(SemFrame::Boolean);
                } else {
                    self.semantic.push(SemFrame::Ignore);
                }
                Ok(true)
            }
            KeyCtx::Head => {
                if key.eq_ignore_ascii_case("vars") {
                    self.semantic.push(SemFrame::Vars);
                } else {
                    self.semantic.push(SemFrame::Ignore);
                }
                Ok(true)
            }
            KeyCtx::Results => {
                if key.eq_ignore_ascii_case("bindings") {
                    self.semantic.push(SemFrame::Bindings);
                } else {
                    self.semantic.push(SemFrame::Ignore);
                }
                Ok(true)
            }
            KeyCtx::BindingRow => {
                let target = if key == fedstream_protocol::SEQ_VAR {
                    Target::Seq
                } else if let Some(proj) = self.projection.as_ref() {
                    match self.wire_vars.iter().position(|v| v == key) {
                        Some(wire) if proj.is_seq_column(wire) => Target::Seq,
                        Some(wire) => match proj.output_column(wire) {
                            Some(out) => Target::Out(out),
                            None => Target::Drop,
                        },
                        None => Target::Drop,
                    }
                } else {
                    Target::Drop
                };
                self.semantic.push(SemFrame::BindingValue(target));
                Ok(true)
            }
            KeyCtx::BindingValue => {
                let part = if key.eq_ignore_ascii_case("type") {
                    Part::Type
                } else if key.eq_ignore_ascii_case("datatype") {
                    Part::Datatype
                } else if key.eq_ignore_ascii_case("value") {
                    Part::Value
                } else if key.eq_ignore_ascii_case("xml:lang") {
                    Part::Lang
                } else {
                    return Err(self.err(format!(
                        "Unknown property {:?} in binding value",
                        key
                    )));
                };
                self.semantic.push(SemFrame::ValueField(part));
                Ok(true)
            }
            KeyCtx::Ignore => Ok(false),
        }
    }

    /// A value is starting at an object field (or the root).
    fn value<S: BatchSink>(
        &mut self,
        tok: Tok,
        owns: bool,
        element: bool,
        core: &mut Core<S>,
    ) -> Result<Option<FinishKind>> {
        match tok {
            Tok::ObjBegin => {
                self.validate_object_start()?;
                self.syntax.push(SynFrame::Object {
                    phase: ObjPhase::KeyOrEnd,
                    field_owns: false,
                    pops_sem: owns,
                });
                Ok(None)
            }
            Tok::ArrBegin => {
                self.validate_array_start()?;
                self.syntax.push(SynFrame::Array {
                    expect_value: true,
                    any_elements: false,
                    pops_sem: owns,
                });
                Ok(None)
            }
            Tok::Str(s) => {
                let finish = self.scalar_str(s, element, core)?;
                if owns {
                    return self.pop_semantic(core).map(|k| k.or(finish));
                }
                Ok(finish)
            }
            Tok::Num(n) => {
                self.scalar_num(n, core)?;
                if owns {
                    return self.pop_semantic(core);
                }
                Ok(None)
            }
            Tok::Bool(v) => {
                self.scalar_bool(v, core)?;
                if owns {
                    return self.pop_semantic(core);
                }
                Ok(None)
            }
            Tok::Null => {
                self.scalar_null()?;
                if owns {
                    return self.pop_semantic(core);
                }
                Ok(None)
            }
            _ => Err(self.err("Expected a value")),
        }
    }

    /// An array element is starting; the semantic owner of the array decides
    /// what is allowed and whether a frame is pushed for it.
    fn element<S: BatchSink>(&mut self, tok: Tok, core: &mut Core<S>) -> Result<Option<FinishKind>> {
        enum Owner {
            Bindings,
            Vars,
            Ignore,
        }
        let owner = match self.semantic.last() {
            Some(SemFrame::Bindings) => Owner::Bindings,
            Some(SemFrame::Vars) => Owner::Vars,
            Some(SemFrame::Ignore) => Owner::Ignore,
            _ => return Err(self.err("Unexpected array element")),
        };
        let owns = match owner {
            Owner::Bindings => match &tok {
                Tok::ObjBegin => {
                    self.ensure_projection(core)?;
                    core.begin_row()?;
                    self.semantic.push(SemFrame::BindingRow);
                    true
                }
                Tok::Str(s) if s.starts_with('!') => false,
                _ => return Err(self.err("Expected a binding object")),
            },
            Owner::Vars => match &tok {
                Tok::Str(_) => false,
                _ => return Err(self.err("Variable name must be a string")),
            },
            Owner::Ignore => false,
        };
        self.value(tok, owns, true, core)
    }

    fn validate_object_start(&self) -> Result<()> {
        match self.semantic.last() {
            Some(
                SemFrame::Head
                | SemFrame::Results
                | SemFrame::BindingValue(_)
                | SemFrame::BindingRow
                | SemFrame::Ignore,
            ) => Ok(()),
            Some(SemFrame::Vars) => Err(self.err("'vars' must be an array")),
            Some(SemFrame::Bindings) => Err(self.err("'bindings' must be an array")),
            Some(SemFrame::Boolean) => Err(self.err("'boolean' must be a scalar")),
            Some(SemFrame::ValueField(_)) => Err(self.err("Binding value part must be a string")),
            _ => Err(self.err("Unexpected object")),
        }
    }

    fn validate_array_start(&self) -> Result<()> {
        match self.semantic.last() {
            Some(SemFrame::Vars | SemFrame::Bindings | SemFrame::Ignore) => Ok(()),
            Some(SemFrame::Head) => Err(self.err("'head' must be an object")),
            Some(SemFrame::Results) => Err(self.err("'results' must be an object")),
            Some(SemFrame::Boolean) => Err(self.err("'boolean' must be a scalar")),
            _ => Err(self.err("Unexpected array")),
        }
    }

    fn scalar_str<S: BatchSink>(
        &mut self,
        s: String,
        element: bool,
        core: &mut Core<S>,
    ) -> Result<Option<FinishKind>> {
        // Control strings at bindings-array position route to the multiplexer.
        if element && matches!(self.semantic.last(), Some(SemFrame::Bindings)) {
            return self.control(&s, core);
        }
        match self.semantic.last() {
            Some(SemFrame::Vars) if element => {
                self.wire_vars.push(s);
                Ok(None)
            }
            Some(SemFrame::ValueField(part)) => {
                let slot = match part {
                    Part::Type => &mut self.part_type,
                    Part::Datatype => &mut self.part_datatype,
                    Part::Value => &mut self.part_value,
                    Part::Lang => &mut self.part_lang,
                };
                *slot = Some(s);
                Ok(None)
            }
            Some(SemFrame::Boolean) => {
                let value = match s.as_str() {
                    "true" => true,
                    "false" => false,
                    _ => return Err(self.err(format!("Invalid boolean result {:?}", s))),
                };
                if value {
                    core.emit_ask_row()?;
                }
                Ok(None)
            }
            Some(SemFrame::Ignore) => Ok(None),
            _ => Err(self.err("Unexpected string value")),
        }
    }

    fn scalar_num<S: BatchSink>(&mut self, n: f64, core: &mut Core<S>) -> Result<()> {
        match self.semantic.last() {
            Some(SemFrame::Boolean) => {
                // Legacy numeric booleans.
                if n == 1.0 {
                    core.emit_ask_row()?;
                    Ok(())
                } else if n == 0.0 {
                    Ok(())
                } else {
                    Err(self.err(format!("Invalid boolean result {}", n)))
                }
            }
            Some(SemFrame::Ignore) => Ok(()),
            Some(SemFrame::ValueField(_)) => Err(self.err("Binding value part must be a string")),
            _ => Err(self.err("Unexpected number value")),
        }
    }

    fn scalar_bool<S: BatchSink>(&mut self, v: bool, core: &mut Core<S>) -> Result<()> {
        match self.semantic.last() {
            Some(SemFrame::Boolean) => {
                if v {
                    core.emit_ask_row()?;
                }
                Ok(())
            }
            Some(SemFrame::Ignore) => Ok(()),
            Some(SemFrame::ValueField(_)) => Err(self.err("Binding value part must be a string")),
            _ => Err(self.err("Unexpected boolean value")),
        }
    }

    fn scalar_null(&self) -> Result<()> {
        match self.semantic.last() {
            Some(SemFrame::Ignore) => Ok(()),
            Some(SemFrame::ValueField(_)) => Err(self.err("Binding value part must be a string")),
            _ => Err(self.err("Unexpected null value")),
        }
    }

    fn control<S: BatchSink>(
        &mut self,
        line: &str,
        core: &mut Core<S>,
    ) -> Result<Option<FinishKind>> {
        let frame = ControlFrame::parse(line, self.line)?;
        match core.handle_control(frame)? {
            ControlAction::Continue => Ok(None),
            ControlAction::EndOfStream => {
                self.finished = true;
                Ok(Some(FinishKind::CleanEnd))
            }
            ControlAction::CancelAcknowledged => {
                self.finished = true;
                Ok(Some(FinishKind::Cancelled))
            }
        }
    }

    fn close_container<S: BatchSink>(&mut self, core: &mut Core<S>) -> Result<Option<FinishKind>> {
        let pops_sem = match self.syntax.pop() {
            Some(SynFrame::Object { pops_sem, .. }) | Some(SynFrame::Array { pops_sem, .. }) => {
                pops_sem
            }
            None => return Err(StreamError::violation("Internal: empty syntax stack")),
        };
        if pops_sem {
            return self.pop_semantic(core);
        }
        Ok(None)
    }

    /// Pop the completed semantic frame and run its close action.
    fn pop_semantic<S: BatchSink>(&mut self, core: &mut Core<S>) -> Result<Option<FinishKind>> {
        match self.semantic.pop() {
            Some(SemFrame::Root) => {
                self.finished = true;
                Ok(Some(FinishKind::CleanEnd))
            }
            Some(SemFrame::Vars) => {
                self.vars_declared = true;
                Ok(None)
            }
            Some(SemFrame::BindingRow) => {
                core.commit_row()?;
                Ok(None)
            }
            Some(SemFrame::BindingValue(target)) => {
                self.materialize(target, core)?;
                Ok(None)
            }
            Some(_) => Ok(None),
            None => Err(StreamError::violation("Internal: empty semantic stack")),
        }
    }

    fn ensure_projection<S: BatchSink>(&mut self, core: &mut Core<S>) -> Result<()> {
        if self.projection.is_some() {
            return Ok(());
        }
        if !self.vars_declared {
            return Err(self.err("Bindings before variable declaration"));
        }
        self.projection = Some(Projection::new(&self.wire_vars, core.vars()));
        Ok(())
    }

    /// Build the term from the buffered parts at binding-value close.
    fn materialize<S: BatchSink>(&mut self, target: Target, core: &mut Core<S>) -> Result<()> {
        let part_type = self.part_type.take();
        let part_value = self.part_value.take();
        let part_datatype = self.part_datatype.take();
        let part_lang = self.part_lang.take();

        let any_part = part_value.is_some() || part_datatype.is_some() || part_lang.is_some();
        let Some(kind) = part_type else {
            if any_part {
                return Err(self.err("No type for value"));
            }
            // Entirely empty value object: treat as an unbound column.
            return Ok(());
        };

        let value = part_value.ok_or_else(|| self.err("No value for binding"))?;
        let term = if kind.eq_ignore_ascii_case("uri") || kind.eq_ignore_ascii_case("iri") {
            Term::iri(value)
        } else if kind.eq_ignore_ascii_case("bnode") {
            Term::bnode(value)
        } else if kind.eq_ignore_ascii_case("literal") || kind.eq_ignore_ascii_case("typed-literal")
        {
            match (part_lang, part_datatype) {
                (Some(lang), _) => Term::literal_lang(value, lang),
                (None, Some(dt)) => Term::literal_typed(value, dt),
                (None, None) => Term::literal(value),
            }
        } else {
            return Err(self.err(format!("Unknown binding value type {:?}", kind)));
        };

        match target {
            Target::Seq => {
                let lexical = term
                    .lexical()
                    .ok_or_else(|| self.err("Sequence column must be a literal"))?;
                let seq = decode_sequence(lexical)?;
                core.apply_sequence(seq)
            }
            Target::Out(col) => core.put(col, term),
            Target::Drop => Ok(()),
        }
    }
}

fn utf8_len(first: u8) -> usize {
    match first {
        0x00..=0x7F => 1,
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        _ => 4,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use fedstream_protocol::NoBindCommands;
    use fedstream_tabular::{CollectSink, Term, VarSet};

    use crate::parser::{Completion, ResultParser};
    use crate::ResultFormat;

    fn parser(vars: &[&str]) -> ResultParser<CollectSink> {
        let vars = Arc::new(VarSet::new(vars.iter().copied().map(Arc::<str>::from)));
        let sink = CollectSink::new(Arc::clone(&vars), 16);
        ResultParser::new(ResultFormat::Json, vars, sink, Box::new(NoBindCommands))
    }

    const DOC: &str = r#"{
        "head": { "vars": ["a", "b"] },
        "results": { "bindings": [
            { "a": {"type": "uri", "value": "http://ex.org/x"},
              "b": {"type": "literal", "value": "hello", "xml:lang": "en"} },
            { "a": {"type": "bnode", "value": "b0"} }
        ] }
    }"#;

    #[test]
    fn test_basic_document() {
        let mut p = parser(&["a", "b"]);
        p.feed(DOC.as_bytes());
        p.end();
        assert!(matches!(p.completion(), Some(Completion::Ended)));

        let rows = p.sink_mut().rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], Some(Term::iri("http://ex.org/x")));
        assert_eq!(rows[0][1], Some(Term::literal_lang("hello", "en")));
        assert_eq!(rows[1][0], Some(Term::bnode("b0")));
        assert_eq!(rows[1][1], None);
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut p = parser(&["a", "b"]);
        for b in DOC.as_bytes() {
            p.feed(std::slice::from_ref(b));
        }
        p.end();
        assert!(matches!(p.completion(), Some(Completion::Ended)));
        assert_eq!(p.sink_mut().rows().len(), 2);
    }

    #[test]
    fn test_projection_and_dropped_vars() {
        // Wire declares [b, a]; output wants [a] only.
        let doc = r#"{"head":{"vars":["b","a"]},"results":{"bindings":[
            {"b":{"type":"literal","value":"B"},"a":{"type":"literal","value":"A"}}
        ]}}"#;
        let mut p = parser(&["a"]);
        p.feed(doc.as_bytes());
        p.end();
        let rows = p.sink_mut().rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], vec![Some(Term::literal("A"))]);
    }

    #[test]
    fn test_boolean_variants() {
        for (body, expect_rows) in [
            (r#"{"boolean": true}"#, 1),
            (r#"{"boolean": false}"#, 0),
            (r#"{"boolean": "true"}"#, 1),
            (r#"{"boolean": "false"}"#, 0),
            (r#"{"boolean": 1}"#, 1),
            (r#"{"boolean": 0}"#, 0),
        ] {
            let mut p = parser(&[]);
            p.feed(body.as_bytes());
            p.end();
            assert!(
                matches!(p.completion(), Some(Completion::Ended)),
                "{}: {:?}",
                body,
                p.completion()
            );
            assert_eq!(p.sink_mut().total_rows(), expect_rows, "{}", body);
        }
    }

    #[test]
    fn test_unknown_root_and_head_properties_ignored() {
        let doc = r#"{"metadata": {"nested": [1, 2, {"x": null}]},
                      "head": {"vars": ["a"], "link": ["http://ex.org/meta"]},
                      "results": {"bindings": []}}"#;
        let mut p = parser(&["a"]);
        p.feed(doc.as_bytes());
        p.end();
        assert!(matches!(p.completion(), Some(Completion::Ended)));
        assert_eq!(p.sink_mut().total_rows(), 0);
    }

    #[test]
    fn test_unknown_binding_value_property_is_error() {
        let doc = r#"{"head":{"vars":["a"]},"results":{"bindings":[
            {"a":{"type":"literal","value":"x","surprise":"y"}}
        ]}}"#;
        let mut p = parser(&["a"]);
        p.feed(doc.as_bytes());
        assert!(matches!(p.completion(), Some(Completion::Failed(_))));
    }

    #[test]
    fn test_missing_type_is_error() {
        let doc = r#"{"head":{"vars":["a"]},"results":{"bindings":[
            {"a":{"value":"x"}}
        ]}}"#;
        let mut p = parser(&["a"]);
        p.feed(doc.as_bytes());
        assert!(matches!(p.completion(), Some(Completion::Failed(_))));
    }

    #[test]
    fn test_typed_literal_legacy_spelling() {
        let doc = r#"{"head":{"vars":["a"]},"results":{"bindings":[
            {"a":{"type":"typed-literal","value":"5","datatype":"http://www.w3.org/2001/XMLSchema#integer"}}
        ]}}"#;
        let mut p = parser(&["a"]);
        p.feed(doc.as_bytes());
        p.end();
        let rows = p.sink_mut().rows();
        assert_eq!(
            rows[0][0],
            Some(Term::literal_typed(
                "5",
                "http://www.w3.org/2001/XMLSchema#integer"
            ))
        );
    }

    #[test]
    fn test_bindings_before_vars_is_error() {
        let doc = r#"{"results":{"bindings":[{"a":{"type":"literal","value":"x"}}]}}"#;
        let mut p = parser(&["a"]);
        p.feed(doc.as_bytes());
        assert!(matches!(p.completion(), Some(Completion::Failed(_))));
    }

    #[test]
    fn test_truncated_document_fails_at_end() {
        let mut p = parser(&["a"]);
        p.feed(br#"{"head":{"vars":["a"]},"results":{"bindings":["#);
        assert!(p.completion().is_none());
        p.end();
        assert!(matches!(p.completion(), Some(Completion::Failed(_))));
    }

    #[test]
    fn test_data_after_document_is_error() {
        let mut p = parser(&[]);
        p.feed(br#"{"boolean": true} trailing"#);
        assert!(matches!(p.completion(), Some(Completion::Failed(_))));
    }

    #[test]
    fn test_control_strings_between_binding_rows() {
        let doc = r#"{"head":{"vars":["a"]},"results":{"bindings":[
            {"a":{"type":"literal","value":"x"}},
            "!info midway note",
            {"a":{"type":"literal","value":"y"}}
        ]}}"#;
        let mut p = parser(&["a"]);
        p.feed(doc.as_bytes());
        p.end();
        assert!(matches!(p.completion(), Some(Completion::Ended)));
        assert_eq!(p.sink_mut().total_rows(), 2);
    }

    #[test]
    fn test_end_frame_inside_bindings_terminates() {
        let doc = r#"{"head":{"vars":["a"]},"results":{"bindings":[
            {"a":{"type":"literal","value":"x"}},
            "!end""#;
        let mut p = parser(&["a"]);
        p.feed(doc.as_bytes());
        assert!(matches!(p.completion(), Some(Completion::Ended)));
        assert_eq!(p.sink_mut().total_rows(), 1);
    }

    #[test]
    fn test_peer_error_frame_inside_bindings() {
        let doc = r#"{"head":{"vars":["a"]},"results":{"bindings":[
            "!error remote evaluation failed""#;
        let mut p = parser(&["a"]);
        p.feed(doc.as_bytes());
        match p.completion() {
            Some(Completion::Failed(e)) => assert!(e.is_peer_signaled()),
            other => panic!("unexpected completion {:?}", other),
        }
    }

    #[test]
    fn test_string_escapes() {
        let doc = r#"{"head":{"vars":["a"]},"results":{"bindings":[
            {"a":{"type":"literal","value":"tab\t nl\n quote\" unié pair😀"}}
        ]}}"#;
        let mut p = parser(&["a"]);
        p.feed(doc.as_bytes());
        p.end();
        let rows = p.sink_mut().rows();
        assert_eq!(
            rows[0][0].as_ref().and_then(|t| t.lexical()),
            Some("tab\t nl\n quote\" uni\u{e9} pair\u{1F600}")
        );
    }
}
