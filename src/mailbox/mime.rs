//! Just enough MIME to read alert mail
//!
//! Extracts the decoded `Subject`, `From` and `Date` headers and the first
//! inline `text/plain` body. Parsing never fails; anything unreadable falls
//! back to a placeholder.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use chrono::{DateTime, Utc};
use encoding_rs::{Encoding, UTF_8};
use mime::Mime;

/// Body used when no readable text part exists.
pub const UNREADABLE_BODY: &str = "Unable to read the message body.";

const MAX_DEPTH: usize = 8;

/// The parts of a message the mailbox engine cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMail {
    pub subject: String,
    pub from: String,
    pub date: Option<DateTime<Utc>>,
    pub body: String,
}

/// Parse a raw RFC 822 message.
pub fn parse_message(raw: &[u8]) -> ParsedMail {
    let (headers, body) = split_headers(raw);

    let subject = headers.get("subject").map(decode_words).unwrap_or_default();
    let from = headers.get("from").map(decode_words).unwrap_or_default();
    let date = headers.get("date").and_then(parse_date);
    let body = extract_text(&headers, body, 0).unwrap_or_else(|| UNREADABLE_BODY.to_string());

    ParsedMail {
        subject: subject.trim().to_string(),
        from: from.trim().to_string(),
        date,
        body,
    }
}

// ---------------------------------------------------------------------------
// Headers
// ---------------------------------------------------------------------------

/// Unfolded headers with lowercase names, in message order.
#[derive(Debug, Default)]
struct Headers(Vec<(String, String)>);

impl Headers {
    fn parse(block: &[u8]) -> Self {
        let text = String::from_utf8_lossy(block);
        let mut headers: Vec<(String, String)> = Vec::new();

        for line in text.lines() {
            if line.starts_with([' ', '\t']) {
                if let Some((_, value)) = headers.last_mut() {
                    value.push_str(line);
                }
                continue;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
            }
        }

        Self(headers)
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Split at the first blank line.
fn split_headers(raw: &[u8]) -> (Headers, &[u8]) {
    if let Some(body) = raw.strip_prefix(b"\r\n").or_else(|| raw.strip_prefix(b"\n")) {
        return (Headers::default(), body);
    }

    let crlf = find(raw, b"\r\n\r\n").map(|i| (i, 4));
    let lf = find(raw, b"\n\n").map(|i| (i, 2));
    let split = match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };

    match split {
        Some((at, len)) => (Headers::parse(&raw[..at]), &raw[at + len..]),
        None => (Headers::parse(raw), &raw[raw.len()..]),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    // Drop trailing comments such as "(UTC)".
    let value = match value.find('(') {
        Some(idx) => &value[..idx],
        None => value,
    };
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Media type of a part. Missing or invalid values mean `text/plain`.
fn content_type(headers: &Headers) -> Mime {
    headers
        .get("content-type")
        .and_then(|raw| strip_unquoted_whitespace(raw).parse::<Mime>().ok())
        .unwrap_or(mime::TEXT_PLAIN)
}

/// Drop folding whitespace outside quoted strings: `mime` only accepts a
/// single space after `;`.
fn strip_unquoted_whitespace(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut quoted = false;
    for c in raw.chars() {
        if c == '"' {
            quoted = !quoted;
        }
        if quoted || !c.is_whitespace() {
            out.push(c);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Encoded words (RFC 2047)
// ---------------------------------------------------------------------------

/// Decode `=?charset?B|Q?...?=` words inside a header value.
///
/// Whitespace between two adjacent encoded words is dropped.
pub fn decode_words(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    let mut after_word = false;

    while let Some(start) = rest.find("=?") {
        let (before, candidate) = rest.split_at(start);
        match decode_word(candidate) {
            Some((decoded, consumed)) => {
                if !(after_word && before.trim().is_empty()) {
                    out.push_str(before);
                }
                out.push_str(&decoded);
                rest = &candidate[consumed..];
                after_word = true;
            }
            None => {
                out.push_str(before);
                out.push_str("=?");
                rest = &candidate[2..];
                after_word = false;
            }
        }
    }

    out.push_str(rest);
    out
}

fn decode_word(word: &str) -> Option<(String, usize)> {
    let inner = word.strip_prefix("=?")?;
    let (charset, after) = inner.split_once('?')?;
    let (encoding, after) = after.split_once('?')?;
    let end = after.find("?=")?;
    let text = &after[..end];
    if text.contains(char::is_whitespace) {
        return None;
    }

    let bytes = match encoding {
        "B" | "b" => decode_base64(text)?,
        "Q" | "q" => decode_quoted(text, true),
        _ => return None,
    };

    // RFC 2231 allows a language suffix: `utf-8*pt`.
    let charset = charset.split('*').next().unwrap_or(charset);
    let consumed = word.len() - after[end + 2..].len();
    Some((decode_charset(Some(charset), &bytes), consumed))
}

// ---------------------------------------------------------------------------
// Bodies
// ---------------------------------------------------------------------------

fn extract_text(headers: &Headers, body: &[u8], depth: usize) -> Option<String> {
    if depth > MAX_DEPTH {
        return None;
    }

    let media = content_type(headers);

    if media.type_() == mime::MULTIPART {
        let boundary = media.get_param(mime::BOUNDARY)?;
        return split_multipart(body, boundary.as_str()).into_iter().find_map(|part| {
            let (part_headers, part_body) = split_headers(part);
            if is_attachment(&part_headers) {
                return None;
            }
            extract_text(&part_headers, part_body, depth + 1)
        });
    }

    // A single-part message is read whatever its text subtype.
    let readable =
        media.essence_str() == "text/plain" || (depth == 0 && media.type_() == mime::TEXT);
    if !readable {
        return None;
    }

    let decoded = match headers
        .get("content-transfer-encoding")
        .map(|e| e.trim().to_ascii_lowercase())
        .as_deref()
    {
        Some("base64") => decode_base64(&String::from_utf8_lossy(body))?,
        Some("quoted-printable") => decode_quoted(&String::from_utf8_lossy(body), false),
        _ => body.to_vec(),
    };

    let charset = media.get_param(mime::CHARSET).map(|c| c.as_str());
    Some(decode_charset(charset, &decoded))
}

fn is_attachment(headers: &Headers) -> bool {
    headers
        .get("content-disposition")
        .is_some_and(|d| d.to_ascii_lowercase().contains("attachment"))
}

/// Split a multipart body into its parts, excluding preamble and epilogue.
fn split_multipart<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let delimiter = format!("--{}", boundary);
    let mut parts = Vec::new();
    let mut current: Option<usize> = None;
    let mut pos = 0;

    while pos < body.len() {
        let line_end = body[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|i| pos + i + 1)
            .unwrap_or(body.len());
        let line = &body[pos..line_end];

        if let Some(tail) = line.strip_prefix(delimiter.as_bytes()) {
            if let Some(start) = current {
                parts.push(strip_line_break(&body[start..pos]));
            }
            if tail.starts_with(b"--") {
                return parts;
            }
            current = Some(line_end);
        }

        pos = line_end;
    }

    if let Some(start) = current {
        parts.push(&body[start..]);
    }
    parts
}

fn strip_line_break(part: &[u8]) -> &[u8] {
    part.strip_suffix(b"\r\n")
        .or_else(|| part.strip_suffix(b"\n"))
        .unwrap_or(part)
}

// ---------------------------------------------------------------------------
// Transfer and charset decoding
// ---------------------------------------------------------------------------

fn decode_base64(text: &str) -> Option<Vec<u8>> {
    let engine = GeneralPurpose::new(
        &alphabet::STANDARD,
        GeneralPurposeConfig::new()
            .with_decode_padding_mode(DecodePaddingMode::Indifferent)
            .with_decode_allow_trailing_bits(true),
    );
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    engine.decode(compact).ok()
}

/// Quoted-printable; `header` selects the RFC 2047 "Q" variant.
fn decode_quoted(text: &str, header: bool) -> Vec<u8> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'_' if header => {
                out.push(b' ');
                i += 1;
            }
            b'=' => {
                let rest = &bytes[i + 1..];
                if rest.starts_with(b"\r\n") {
                    i += 3;
                } else if rest.starts_with(b"\n") {
                    i += 2;
                } else if let Some(byte) = rest.get(..2).and_then(hex_byte) {
                    out.push(byte);
                    i += 3;
                } else {
                    out.push(b'=');
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    out
}

fn hex_byte(pair: &[u8]) -> Option<u8> {
    let text = std::str::from_utf8(pair).ok()?;
    u8::from_str_radix(text, 16).ok()
}

fn decode_charset(label: Option<&str>, bytes: &[u8]) -> String {
    let encoding = label
        .and_then(|l| Encoding::for_label(l.trim().as_bytes()))
        .unwrap_or(UTF_8);
    encoding.decode_without_bom_handling(bytes).0.into_owned()
}
