//! Minimal blocking HTTP/1.1 server over any Read + Write stream.
//!
//! Intentionally limited surface:
//! - One request per connection (no keep-alive)
//! - No chunked transfer encoding (rejected)
//! - POST requires Content-Length
//! - Header cap: 32 KiB; body cap set by the caller and enforced while
//!   reading (Read::take, not Content-Length trust)

use std::io::{Read, Write};

/// Maximum header section size (32 KiB)
const MAX_HEADER_SIZE: usize = 32 * 1024;

/// Maximum number of request headers
const MAX_HEADERS: usize = 64;

/// Parsed HTTP request (transport-free)
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    /// Request target: path plus optional `?query`
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Get header value by name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Target without the query string
    pub fn path(&self) -> &str {
        self.target
            .split_once('?')
            .map(|(path, _)| path)
            .unwrap_or(&self.target)
    }

    /// First value of a query parameter
    pub fn query_param(&self, name: &str) -> Option<&str> {
        let (_, query) = self.target.split_once('?')?;
        query
            .split('&')
            .filter_map(|pair| pair.split_once('=').or(Some((pair, ""))))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
    }
}

/// HTTP response to write back
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Create a JSON response
    pub fn json(status: u16, value: &impl serde::Serialize) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: serde_json::to_vec(value).unwrap_or_default(),
        }
    }

    /// Response without a body
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Add a header
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Get header value by name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Why a request could not be read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    /// Not a well-formed request this server accepts
    Malformed(String),
    /// Declared or actual body larger than the cap
    TooLarge { limit: usize },
}

impl ReadError {
    pub fn status(&self) -> u16 {
        match self {
            ReadError::Malformed(_) => 400,
            ReadError::TooLarge { .. } => 413,
        }
    }

    pub fn message(&self) -> String {
        match self {
            ReadError::Malformed(msg) => msg.clone(),
            ReadError::TooLarge { limit } => {
                format!("Request body exceeds {} bytes", limit)
            }
        }
    }
}

/// Reason phrase for common status codes
fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Read and parse one HTTP request from a stream.
///
/// Returns None if the connection closed before a complete request was received.
/// Returns Some(Err) for malformed or oversized requests (caller should write an
/// error response).
pub fn read_request(
    stream: &mut impl Read,
    max_body: usize,
) -> Option<Result<HttpRequest, ReadError>> {
    // Read header section with cap
    let mut header_buf = Vec::with_capacity(4096);
    let mut byte = [0u8; 1];

    loop {
        match stream.read(&mut byte) {
            Ok(0) => {
                if header_buf.is_empty() {
                    return None; // clean close
                }
                return Some(Err(ReadError::Malformed(
                    "Connection closed mid-request".to_string(),
                )));
            }
            Ok(_) => {
                header_buf.push(byte[0]);
                if header_buf.len() > MAX_HEADER_SIZE {
                    return Some(Err(ReadError::Malformed("Headers too large".to_string())));
                }
                if header_buf.ends_with(b"\r\n\r\n") {
                    break;
                }
            }
            Err(e) => {
                if header_buf.is_empty() {
                    return None; // read error on fresh connection = closed
                }
                return Some(Err(ReadError::Malformed(format!("Read error: {}", e))));
            }
        }
    }

    let mut parsed_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut parsed_headers);

    match req.parse(&header_buf) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Some(Err(ReadError::Malformed(
                "Incomplete HTTP request".to_string(),
            )));
        }
        Err(e) => {
            return Some(Err(ReadError::Malformed(format!("HTTP parse error: {}", e))));
        }
    }

    let method = req.method.unwrap_or("").to_string();
    let target = req.path.unwrap_or("/").to_string();

    let mut headers = Vec::new();
    let mut content_length: Option<usize> = None;
    let mut chunked = false;

    for h in req.headers.iter() {
        let name = h.name.to_string();
        let value = String::from_utf8_lossy(h.value).to_string();

        if name.eq_ignore_ascii_case("Content-Length") {
            match value.trim().parse() {
                Ok(len) => content_length = Some(len),
                Err(_) => {
                    return Some(Err(ReadError::Malformed(
                        "Invalid Content-Length".to_string(),
                    )))
                }
            }
        }
        if name.eq_ignore_ascii_case("Transfer-Encoding")
            && value.to_lowercase().contains("chunked")
        {
            chunked = true;
        }

        headers.push((name, value));
    }

    if chunked {
        return Some(Err(ReadError::Malformed(
            "Chunked transfer encoding not supported".to_string(),
        )));
    }

    let body = if method == "POST" || method == "PUT" || method == "PATCH" {
        let Some(len) = content_length else {
            return Some(Err(ReadError::Malformed(
                "POST requires Content-Length".to_string(),
            )));
        };
        if len > max_body {
            return Some(Err(ReadError::TooLarge { limit: max_body }));
        }

        let mut body = Vec::with_capacity(len);
        let bytes_read = stream
            .take(len as u64)
            .read_to_end(&mut body)
            .unwrap_or(0);
        if bytes_read < len {
            return Some(Err(ReadError::Malformed(
                "Body shorter than Content-Length".to_string(),
            )));
        }
        body
    } else {
        Vec::new()
    };

    Some(Ok(HttpRequest {
        method,
        target,
        headers,
        body,
    }))
}

/// Write an HTTP response to a stream.
pub fn write_response(stream: &mut impl Write, response: &HttpResponse) {
    let mut header_block = format!(
        "HTTP/1.1 {} {}\r\n",
        response.status,
        reason(response.status)
    );
    header_block.push_str(&format!("Content-Length: {}\r\n", response.body.len()));
    header_block.push_str("Connection: close\r\n");

    for (name, value) in &response.headers {
        header_block.push_str(&format!("{}: {}\r\n", name, value));
    }
    header_block.push_str("\r\n");

    // Client may have disconnected
    let _ = stream.write_all(header_block.as_bytes());
    if !response.body.is_empty() {
        let _ = stream.write_all(&response.body);
    }
    let _ = stream.flush();
}
