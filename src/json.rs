//! Bounded JSON-subset codec
//!
//! This module implements the two halves of the wire codec: [`JsonView`],
//! a zero-copy field reader over a received text, and [`JsonBuilder`], an
//! append-only writer with a hard capacity cap.
//!
//! The dialect is deliberately small: string, integer and fixed-point
//! float scalars, nested objects and flat arrays, the escape set
//! `\n \r \t \" \\`. There is no exponent syntax, no Unicode escapes and
//! no document tree; every lookup is an independent linear scan.
//!
//! # Lookup semantics
//!
//! [`JsonView`] searches for the literal byte pattern `"<key>"` and takes
//! the **first** occurrence in the text, with no awareness of nesting.
//! Two consequences callers must keep in mind:
//!
//! - a key inside a nested object shadows the same key at the top level
//!   when it occurs earlier in the byte stream;
//! - if the first occurrence is not followed by a colon (for example the
//!   key string appears as a *value*), the lookup fails outright rather
//!   than continuing to search.
//!
//! Both behaviors are relied upon by the envelope layer and are part of
//! the codec's contract.

/// Maximum extracted string length in bytes (truncating cap)
pub const MAX_STRING_LEN: usize = 64;

/// Default builder capacity, sized for one protocol message
pub const DEFAULT_CAPACITY: usize = 512;

/// Truncate `s` to at most `max_len` bytes, backing off to the nearest
/// char boundary so multi-byte sequences are never split.
pub fn clip(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn is_ws(b: u8) -> bool {
    b == b' ' || b == b'\t' || b == b'\n' || b == b'\r'
}

fn skip_ws(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && is_ws(bytes[pos]) {
        pos += 1;
    }
    pos
}

/// Read-only field access over a JSON-subset text.
///
/// Borrowing, allocation happens only when a value is extracted. All
/// accessors are independent scans; see the module docs for the
/// first-match lookup contract.
#[derive(Debug, Clone, Copy)]
pub struct JsonView<'a> {
    text: &'a str,
}

impl<'a> JsonView<'a> {
    /// Wrap a received text for field access
    pub fn new(text: &'a str) -> Self {
        Self { text }
    }

    /// The underlying text
    pub fn text(&self) -> &'a str {
        self.text
    }

    /// Locate the value position for `key`, or None
    fn find_key(&self, key: &str) -> Option<usize> {
        if key.is_empty() || key.len() > MAX_STRING_LEN {
            return None;
        }

        let pattern = format!("\"{}\"", key);
        let start = self.text.find(&pattern)?;

        let bytes = self.text.as_bytes();
        let mut pos = start + pattern.len();
        pos = skip_ws(bytes, pos);

        if bytes.get(pos) != Some(&b':') {
            return None;
        }
        pos += 1;
        Some(skip_ws(bytes, pos))
    }

    /// Extract a string value for `key`, unescaping `\n \r \t \" \\`.
    ///
    /// Unknown escapes pass the following byte through literally. The
    /// result is truncated at `max_len - 1` bytes; an unterminated
    /// string yields everything up to the end of input. Returns None if
    /// the key is absent or the value is not a string.
    pub fn get_str(&self, key: &str, max_len: usize) -> Option<String> {
        let pos = self.find_key(key)?;
        extract_string(self.text.as_bytes(), pos, max_len)
    }

    /// Extract an integer value for `key`.
    ///
    /// The value must start with a digit or `-`; the digit run is parsed
    /// and anything after it ignored. A prefix that does not fit an
    /// `i32` yields `default`, as does an absent key or non-numeric
    /// value.
    pub fn get_int(&self, key: &str, default: i32) -> i32 {
        let Some(pos) = self.find_key(key) else {
            return default;
        };
        let bytes = self.text.as_bytes();
        match bytes.get(pos) {
            Some(b) if b.is_ascii_digit() || *b == b'-' => extract_int(bytes, pos, default),
            _ => default,
        }
    }

    /// Extract a float value for `key`.
    ///
    /// Same tolerance rules as [`get_int`](Self::get_int), with `.`
    /// additionally accepted as a leading character.
    pub fn get_float(&self, key: &str, default: f32) -> f32 {
        let Some(pos) = self.find_key(key) else {
            return default;
        };
        let bytes = self.text.as_bytes();
        match bytes.get(pos) {
            Some(b) if b.is_ascii_digit() || *b == b'-' || *b == b'.' => {
                extract_float(bytes, pos, default)
            }
            _ => default,
        }
    }

    /// Extract a nested object for `key` as raw text.
    ///
    /// The scan is depth-balanced and string-aware: braces inside string
    /// values do not count. Returns None if the input ends or `max_len`
    /// is reached before the object closes, never a truncated partial.
    pub fn get_object(&self, key: &str, max_len: usize) -> Option<String> {
        let pos = self.find_key(key)?;
        extract_block(self.text.as_bytes(), pos, b'{', b'}', max_len)
    }

    /// Number of top-level elements in the array at `key`.
    ///
    /// Returns None if the key is absent or the value is not an array.
    pub fn get_array_len(&self, key: &str) -> Option<usize> {
        let pos = self.find_key(key)?;
        let bytes = self.text.as_bytes();
        if bytes.get(pos) != Some(&b'[') {
            return None;
        }

        let mut pos = skip_ws(bytes, pos + 1);
        if bytes.get(pos) == Some(&b']') {
            return Some(0);
        }

        let mut count = 1usize;
        let mut depth = 0i32;
        let mut in_string = false;
        while pos < bytes.len() {
            let b = bytes[pos];
            if b == b']' && depth == 0 && !in_string {
                break;
            }
            if b == b'"' && (pos == 0 || bytes[pos - 1] != b'\\') {
                in_string = !in_string;
            } else if !in_string {
                match b {
                    b'[' | b'{' => depth += 1,
                    b']' | b'}' => depth -= 1,
                    b',' if depth == 0 => count += 1,
                    _ => {}
                }
            }
            pos += 1;
        }
        Some(count)
    }

    /// Extract the string element at `index` of the array at `key`.
    ///
    /// Element skipping understands string and object elements only;
    /// scalar elements cannot be skipped past, so only index 0 is
    /// reachable in an all-scalar array.
    pub fn get_array_string(&self, key: &str, index: usize, max_len: usize) -> Option<String> {
        let pos = self.seek_array_element(key, index)?;
        extract_string(self.text.as_bytes(), pos, max_len)
    }

    /// Extract the object element at `index` of the array at `key`
    pub fn get_array_object(&self, key: &str, index: usize, max_len: usize) -> Option<String> {
        let pos = self.seek_array_element(key, index)?;
        extract_block(self.text.as_bytes(), pos, b'{', b'}', max_len)
    }

    /// Advance to the start of array element `index`, or None
    fn seek_array_element(&self, key: &str, index: usize) -> Option<usize> {
        let pos = self.find_key(key)?;
        let bytes = self.text.as_bytes();
        if bytes.get(pos) != Some(&b'[') {
            return None;
        }

        let mut pos = skip_ws(bytes, pos + 1);
        let mut current = 0usize;
        while pos < bytes.len() && current < index {
            match bytes[pos] {
                b'"' => {
                    pos += 1;
                    while pos < bytes.len() {
                        if bytes[pos] == b'"' && bytes[pos - 1] != b'\\' {
                            break;
                        }
                        pos += 1;
                    }
                    if pos < bytes.len() {
                        pos += 1;
                    }
                }
                b'{' => {
                    let mut depth = 1i32;
                    pos += 1;
                    while pos < bytes.len() && depth > 0 {
                        match bytes[pos] {
                            b'{' => depth += 1,
                            b'}' => depth -= 1,
                            _ => {}
                        }
                        pos += 1;
                    }
                }
                _ => {}
            }

            pos = skip_ws(bytes, pos);
            if bytes.get(pos) == Some(&b',') {
                pos = skip_ws(bytes, pos + 1);
                current += 1;
            } else {
                break;
            }
        }

        if current != index {
            return None;
        }
        Some(pos)
    }
}

fn extract_string(bytes: &[u8], mut pos: usize, max_len: usize) -> Option<String> {
    if bytes.get(pos) != Some(&b'"') {
        return None;
    }
    pos += 1;

    let cap = max_len.saturating_sub(1);
    let mut out = Vec::with_capacity(cap.min(MAX_STRING_LEN));
    while pos < bytes.len() && bytes[pos] != b'"' && out.len() < cap {
        if bytes[pos] == b'\\' && pos + 1 < bytes.len() {
            pos += 1;
            match bytes[pos] {
                b'n' => out.push(b'\n'),
                b'r' => out.push(b'\r'),
                b't' => out.push(b'\t'),
                b'"' => out.push(b'"'),
                b'\\' => out.push(b'\\'),
                other => out.push(other),
            }
        } else {
            out.push(bytes[pos]);
        }
        pos += 1;
    }

    Some(String::from_utf8_lossy(&out).into_owned())
}

fn extract_int(bytes: &[u8], pos: usize, default: i32) -> i32 {
    let mut end = pos;
    if bytes.get(end) == Some(&b'-') {
        end += 1;
    }
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    std::str::from_utf8(&bytes[pos..end])
        .ok()
        .and_then(|s| s.parse::<i32>().ok())
        .unwrap_or(default)
}

fn extract_float(bytes: &[u8], pos: usize, default: f32) -> f32 {
    let mut end = pos;
    if bytes.get(end) == Some(&b'-') {
        end += 1;
    }
    let mut seen_dot = false;
    while end < bytes.len() {
        match bytes[end] {
            b if b.is_ascii_digit() => end += 1,
            b'.' if !seen_dot => {
                seen_dot = true;
                end += 1;
            }
            _ => break,
        }
    }
    std::str::from_utf8(&bytes[pos..end])
        .ok()
        .and_then(|s| s.parse::<f32>().ok())
        .unwrap_or(default)
}

fn extract_block(bytes: &[u8], mut pos: usize, open: u8, close: u8, max_len: usize) -> Option<String> {
    if bytes.get(pos) != Some(&open) {
        return None;
    }

    let cap = max_len.saturating_sub(1);
    let mut out = Vec::new();
    let mut depth = 1i32;
    if out.len() >= cap {
        return None;
    }
    out.push(bytes[pos]);
    pos += 1;

    while pos < bytes.len() && depth > 0 && out.len() < cap {
        if bytes[pos] == b'"' {
            // skip over the string, braces inside do not count
            out.push(bytes[pos]);
            pos += 1;
            while pos < bytes.len() && out.len() < cap {
                out.push(bytes[pos]);
                if bytes[pos] == b'"' && bytes[pos - 1] != b'\\' {
                    pos += 1;
                    break;
                }
                pos += 1;
            }
        } else {
            if bytes[pos] == open {
                depth += 1;
            } else if bytes[pos] == close {
                depth -= 1;
            }
            out.push(bytes[pos]);
            pos += 1;
        }
    }

    if depth != 0 {
        return None;
    }
    Some(String::from_utf8_lossy(&out).into_owned())
}

/// Append-only JSON writer with a hard capacity cap.
///
/// The builder tracks open-scope depth and arms a comma before each
/// insertion. An append that would exceed the capacity latches a sticky
/// error: all further writes are suppressed and [`finish`](Self::finish)
/// returns None. String values are written verbatim, the builder does
/// not escape.
#[derive(Debug, Clone)]
pub struct JsonBuilder {
    buf: String,
    capacity: usize,
    depth: u8,
    need_comma: bool,
    error: bool,
}

impl JsonBuilder {
    /// Create a builder with the default message capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a builder with an explicit capacity in bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: String::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity,
            depth: 0,
            need_comma: false,
            error: false,
        }
    }

    fn append(&mut self, s: &str) {
        if self.error {
            return;
        }
        if self.buf.len() + s.len() >= self.capacity {
            self.error = true;
            return;
        }
        self.buf.push_str(s);
    }

    fn add_comma(&mut self) {
        if self.need_comma {
            self.append(",");
        }
        self.need_comma = false;
    }

    fn add_key(&mut self, key: &str) {
        self.add_comma();
        self.append("\"");
        self.append(key);
        self.append("\":");
    }

    /// Open an object scope
    pub fn begin_object(&mut self) -> &mut Self {
        self.add_comma();
        self.append("{");
        self.depth = self.depth.saturating_add(1);
        self.need_comma = false;
        self
    }

    /// Close the innermost object scope
    pub fn end_object(&mut self) -> &mut Self {
        self.append("}");
        self.depth = self.depth.saturating_sub(1);
        self.need_comma = true;
        self
    }

    /// Open an array scope, keyed when `key` is given
    pub fn begin_array(&mut self, key: Option<&str>) -> &mut Self {
        match key {
            Some(k) => self.add_key(k),
            None => self.add_comma(),
        }
        self.append("[");
        self.depth = self.depth.saturating_add(1);
        self.need_comma = false;
        self
    }

    /// Close the innermost array scope
    pub fn end_array(&mut self) -> &mut Self {
        self.append("]");
        self.depth = self.depth.saturating_sub(1);
        self.need_comma = true;
        self
    }

    /// Add a keyed string value, written verbatim
    pub fn add_str(&mut self, key: &str, value: &str) -> &mut Self {
        self.add_key(key);
        self.append("\"");
        self.append(value);
        self.append("\"");
        self.need_comma = true;
        self
    }

    /// Add a keyed integer value
    pub fn add_int(&mut self, key: &str, value: i64) -> &mut Self {
        self.add_key(key);
        self.append(&value.to_string());
        self.need_comma = true;
        self
    }

    /// Add a keyed float with a fixed number of decimals
    pub fn add_float(&mut self, key: &str, value: f32, decimals: u8) -> &mut Self {
        self.add_key(key);
        self.append(&format!("{:.*}", decimals as usize, value));
        self.need_comma = true;
        self
    }

    /// Add a keyed boolean value
    pub fn add_bool(&mut self, key: &str, value: bool) -> &mut Self {
        self.add_key(key);
        self.append(if value { "true" } else { "false" });
        self.need_comma = true;
        self
    }

    /// Open a keyed nested object
    pub fn add_object(&mut self, key: &str) -> &mut Self {
        self.add_key(key);
        self.append("{");
        self.depth = self.depth.saturating_add(1);
        self.need_comma = false;
        self
    }

    /// Add an unkeyed integer (array element)
    pub fn add_raw_int(&mut self, value: i64) -> &mut Self {
        self.add_comma();
        self.append(&value.to_string());
        self.need_comma = true;
        self
    }

    /// Add an unkeyed string (array element), written verbatim
    pub fn add_raw_str(&mut self, value: &str) -> &mut Self {
        self.add_comma();
        self.append("\"");
        self.append(value);
        self.append("\"");
        self.need_comma = true;
        self
    }

    /// Whether an append has overflowed the capacity
    pub fn has_error(&self) -> bool {
        self.error
    }

    /// Number of scopes still open
    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// The hard capacity cap in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written yet
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Finish the document.
    ///
    /// Returns None if any append overflowed or if any scope is still
    /// open; otherwise the completed text.
    pub fn finish(self) -> Option<String> {
        if self.error || self.depth != 0 {
            return None;
        }
        Some(self.buf)
    }
}

impl Default for JsonBuilder {
    fn default() -> Self {
        Self::new()
    }
}
