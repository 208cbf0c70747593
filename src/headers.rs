//! Structured view of HTTP headers.
//!
//! A [`Header`] exposes three levels: the name, the whole raw value, and a
//! lazily parsed sequence of [`HeaderElement`]s. Elements are the
//! comma-separated parts of the value; each element carries an optional value
//! and a list of semicolon-separated [`Parameter`]s. Given
//! `Set-Cookie: c2=b; path="/", c3=c; domain="localhost"`, the header has two
//! elements: `c2=b` with parameter `path=/`, and `c3=c` with parameter
//! `domain=localhost`.

use std::sync::OnceLock;

/// Ordered collection of HTTP headers.
#[derive(Clone, Debug, Default)]
pub struct Headers {
    entries: Vec<Header>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push(Header::new(name, value));
    }

    /// First header with the given name, compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&Header> {
        self.entries
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
    }

    /// Raw value of the first header with the given name.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.get(name).map(Header::value)
    }

    /// First element of the `Content-Type` header, when present.
    pub fn content_type(&self) -> Option<&HeaderElement> {
        self.get("Content-Type").and_then(|h| h.elements().first())
    }

    /// Raw value of the `Location` header, when present.
    pub fn location(&self) -> Option<&str> {
        self.value("Location")
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(name, value)| Header::new(name, value))
                .collect(),
        }
    }
}

/// A single HTTP header: name, raw value, and lazily parsed elements.
#[derive(Debug)]
pub struct Header {
    name: String,
    value: String,
    elements: OnceLock<Vec<HeaderElement>>,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            elements: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Comma-separated elements of the value, parsed on first access and
    /// memoized. Repeated calls return the same parse.
    pub fn elements(&self) -> &[HeaderElement] {
        self.elements.get_or_init(|| parse_elements(&self.value))
    }
}

impl Clone for Header {
    fn clone(&self) -> Self {
        let elements = OnceLock::new();
        if let Some(parsed) = self.elements.get() {
            let _ = elements.set(parsed.clone());
        }
        Self {
            name: self.name.clone(),
            value: self.value.clone(),
            elements,
        }
    }
}

/// One comma-separated part of a header value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderElement {
    name: String,
    value: Option<String>,
    parameters: Vec<Parameter>,
}

impl HeaderElement {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// E.g. `123` in `Set-Cookie: sessionId=123`, but `None` in
    /// `Accept: text/plain`.
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// First parameter with the given name, compared case-insensitively.
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }
}

/// A name/value pair within a header element, e.g. `charset=UTF-8` in
/// `Accept: application/json; charset=UTF-8`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Parameter {
    name: String,
    value: Option<String>,
}

impl Parameter {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }
}

/// Splits a raw header value into elements.
///
/// The scan is a single left-to-right pass: outside double quotes a comma
/// terminates an element and a semicolon terminates a parameter; inside
/// quotes both are literal, and a backslash escapes the next character.
/// Malformed input never fails; the worst case is a degenerate parse where
/// the whole value becomes one element.
fn parse_elements(raw: &str) -> Vec<HeaderElement> {
    split_top_level(raw, ',')
        .into_iter()
        .filter_map(|segment| parse_element(&segment))
        .collect()
}

fn parse_element(segment: &str) -> Option<HeaderElement> {
    let mut tokens = split_top_level(segment, ';').into_iter();
    let head = loop {
        let candidate = tokens.next()?;
        if !candidate.trim().is_empty() {
            break candidate;
        }
    };

    let (name, value) = split_name_value(&head);
    if name.is_empty() {
        return None;
    }

    let parameters = tokens
        .filter(|t| !t.trim().is_empty())
        .map(|t| {
            let (name, value) = split_name_value(&t);
            Parameter { name, value }
        })
        .filter(|p| !p.name.is_empty())
        .collect();

    Some(HeaderElement {
        name,
        value,
        parameters,
    })
}

/// Splits on a delimiter, skipping occurrences inside double quotes.
fn split_top_level(raw: &str, delimiter: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;

    for ch in raw.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quotes => {
                current.push(ch);
                escaped = true;
            }
            '"' => {
                current.push(ch);
                in_quotes = !in_quotes;
            }
            c if c == delimiter && !in_quotes => {
                parts.push(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
    }
    parts.push(current);
    parts
}

/// Splits a `name=value` token on the first top-level `=`; the value is
/// optional and surrounding quotes are stripped from it.
fn split_name_value(token: &str) -> (String, Option<String>) {
    let token = token.trim();
    match token.split_once('=') {
        Some((name, value)) => (name.trim().to_string(), Some(unquote(value.trim()))),
        None => (token.to_string(), None),
    }
}

fn unquote(value: &str) -> String {
    let stripped = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    if stripped.contains('\\') {
        let mut out = String::with_capacity(stripped.len());
        let mut escaped = false;
        for ch in stripped.chars() {
            if escaped {
                out.push(ch);
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else {
                out.push(ch);
            }
        }
        out
    } else {
        stripped.to_string()
    }
}
