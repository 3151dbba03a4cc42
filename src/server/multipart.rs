//! `multipart/form-data` body parsing
//!
//! Only what an upload form needs: named parts, an optional filename and an
//! optional per-part content type. Part headers are parsed with httparse.

use std::fmt;

const MAX_PART_HEADERS: usize = 16;

/// One form part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl Part {
    /// Part data as text, if it is UTF-8
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartError(pub String);

impl fmt::Display for MultipartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for MultipartError {}

fn err(msg: impl Into<String>) -> MultipartError {
    MultipartError(msg.into())
}

/// Boundary from a `multipart/form-data` Content-Type, None for other types
pub fn boundary(content_type: &str) -> Option<String> {
    let mut params = content_type.split(';');
    let mime = params.next()?.trim();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params
        .filter_map(|p| p.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| unquote(value.trim()).to_string())
        .filter(|b| !b.is_empty())
}

/// Split a multipart body into its parts
pub fn parse(body: &[u8], boundary: &str) -> Result<Vec<Part>, MultipartError> {
    let delimiter = format!("--{}", boundary).into_bytes();
    let mut separator = b"\r\n".to_vec();
    separator.extend_from_slice(&delimiter);

    // Preamble ends at the first delimiter
    let start = find(body, &delimiter).ok_or_else(|| err("Multipart boundary not found"))?;
    let mut pos = start + delimiter.len();
    let mut parts = Vec::new();

    loop {
        let rest = &body[pos..];
        if rest.starts_with(b"--") {
            return Ok(parts);
        }
        let rest = rest
            .strip_prefix(b"\r\n")
            .ok_or_else(|| err("Malformed multipart delimiter"))?;
        pos += 2;

        let mut headers = [httparse::EMPTY_HEADER; MAX_PART_HEADERS];
        let (consumed, headers) = match httparse::parse_headers(rest, &mut headers) {
            Ok(httparse::Status::Complete((consumed, headers))) => (consumed, headers),
            Ok(httparse::Status::Partial) => return Err(err("Truncated multipart headers")),
            Err(e) => return Err(err(format!("Invalid multipart headers: {}", e))),
        };

        let mut disposition = None;
        let mut content_type = None;
        for h in headers.iter() {
            let value = String::from_utf8_lossy(h.value).trim().to_string();
            if h.name.eq_ignore_ascii_case("Content-Disposition") {
                disposition = Some(value);
            } else if h.name.eq_ignore_ascii_case("Content-Type") {
                content_type = Some(value);
            }
        }
        let disposition =
            disposition.ok_or_else(|| err("Multipart part without Content-Disposition"))?;
        let (name, filename) = parse_disposition(&disposition)?;

        let data_start = pos + consumed;
        let data_len = find(&body[data_start..], &separator)
            .ok_or_else(|| err("Multipart body is not terminated"))?;

        parts.push(Part {
            name,
            filename,
            content_type,
            data: body[data_start..data_start + data_len].to_vec(),
        });
        pos = data_start + data_len + separator.len();
    }
}

/// `form-data; name="file"; filename="shoe.jpg"` -> (name, filename)
fn parse_disposition(value: &str) -> Result<(String, Option<String>), MultipartError> {
    let mut params = value.split(';');
    let kind = params.next().unwrap_or("").trim();
    if !kind.eq_ignore_ascii_case("form-data") {
        return Err(err(format!("Unsupported Content-Disposition: {}", kind)));
    }

    let mut name = None;
    let mut filename = None;
    for param in params {
        let Some((key, raw)) = param.trim().split_once('=') else {
            continue;
        };
        let value = unquote(raw.trim()).to_string();
        match key.trim().to_ascii_lowercase().as_str() {
            "name" => name = Some(value),
            "filename" => filename = Some(value),
            _ => {}
        }
    }

    let name = name.ok_or_else(|| err("Multipart part without a name"))?;
    Ok((name, filename))
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
