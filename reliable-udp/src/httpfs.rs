//! Minimal HTTP/1.0 file server carried over the reliable transport.
//!
//! A request or response is exactly one blob: start line, headers, blank
//! line, body.  [`FileStore`] serves a single directory:
//!
//! | request       | result                                              |
//! |---------------|-----------------------------------------------------|
//! | `GET /`       | `200`, newline-separated listing of the root        |
//! | `GET /name`   | `200` with the file, or `404`                       |
//! | `POST /name`  | body appended to the file; `201` if new, else `200` |
//! | `..` in path  | `403`                                               |

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use log::{debug, warn};
use thiserror::Error;

const VERSION: &str = "HTTP/1.0";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HttpError {
    #[error("message has no header terminator")]
    Unterminated,
    #[error("malformed start line: {0:?}")]
    StartLine(String),
    #[error("malformed header line: {0:?}")]
    Header(String),
    #[error("unsupported method {0:?}")]
    Method(String),
    #[error("headers are not valid UTF-8")]
    Encoding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
        })
    }
}

impl std::str::FromStr for Method {
    type Err = HttpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            _ => Err(HttpError::Method(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn post(path: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, HttpError> {
        let (start, headers, body) = split_message(bytes)?;
        let mut parts = start.split_whitespace();
        let (Some(method), Some(path)) = (parts.next(), parts.next()) else {
            return Err(HttpError::StartLine(start.to_string()));
        };
        Ok(Self {
            method: method.parse()?,
            path: path.to_string(),
            headers,
            body,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let start = format!("{} {} {VERSION}", self.method, self.path);
        join_message(&start, &self.headers, &self.body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            reason: reason_phrase(status).to_string(),
            headers: vec![("Content-Type".to_string(), content_type.to_string())],
            body: body.into(),
        }
    }

    /// Plain-text response whose body is the status line itself.
    pub fn status(status: u16) -> Self {
        let text = format!("{status} {}\n", reason_phrase(status));
        Self::new(status, "text/plain", text)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, HttpError> {
        let (start, headers, body) = split_message(bytes)?;
        let mut parts = start.splitn(3, ' ');
        let status = match (parts.next(), parts.next()) {
            (Some(version), Some(code)) if version.starts_with("HTTP/") => code
                .parse()
                .map_err(|_| HttpError::StartLine(start.to_string()))?,
            _ => return Err(HttpError::StartLine(start.to_string())),
        };
        Ok(Self {
            status,
            reason: parts.next().unwrap_or_default().to_string(),
            headers,
            body,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let start = format!("{VERSION} {} {}", self.status, self.reason);
        join_message(&start, &self.headers, &self.body)
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        _ => "Internal Server Error",
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

type Parts = (String, Vec<(String, String)>, Vec<u8>);

fn split_message(bytes: &[u8]) -> Result<Parts, HttpError> {
    let split = bytes
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or(HttpError::Unterminated)?;
    let head = std::str::from_utf8(&bytes[..split]).map_err(|_| HttpError::Encoding)?;
    let mut body = bytes[split + 4..].to_vec();

    let mut lines = head.split("\r\n");
    let start = lines.next().unwrap_or_default().trim().to_string();
    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| HttpError::Header(line.to_string()))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    // A partial delivery may leave the body shorter than announced.
    if let Some(len) = find_header(&headers, "Content-Length").and_then(|v| v.parse().ok()) {
        body.truncate(len);
    }
    Ok((start, headers, body))
}

fn join_message(start: &str, headers: &[(String, String)], body: &[u8]) -> Vec<u8> {
    let mut out = String::with_capacity(128);
    out.push_str(start);
    out.push_str("\r\n");
    for (name, value) in headers {
        if name.eq_ignore_ascii_case("Content-Length") {
            continue;
        }
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
    let mut bytes = out.into_bytes();
    bytes.extend_from_slice(body);
    bytes
}

/// Directory-backed resource store.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn handle(&self, request: &Request) -> Response {
        debug!("[httpfs] {} {}", request.method, request.path);
        let target = match self.resolve(&request.path) {
            Ok(target) => target,
            Err(status) => return Response::status(status),
        };
        let result = match request.method {
            Method::Get => self.get(&target),
            Method::Post => self.post(&target, &request.body),
        };
        result.unwrap_or_else(|e| {
            warn!("[httpfs] {} {} failed: {e}", request.method, request.path);
            Response::status(500)
        })
    }

    /// Map a request path onto the store, refusing anything outside it.
    fn resolve(&self, path: &str) -> Result<PathBuf, u16> {
        let Some(relative) = path.strip_prefix('/') else {
            return Err(400);
        };
        let mut target = self.root.clone();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => target.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(403)
                }
            }
        }
        Ok(target)
    }

    fn get(&self, target: &Path) -> io::Result<Response> {
        if target.is_dir() {
            let mut names = Vec::new();
            for entry in fs::read_dir(target)? {
                let entry = entry?;
                let mut name = entry.file_name().to_string_lossy().into_owned();
                if entry.file_type()?.is_dir() {
                    name.push('/');
                }
                names.push(name);
            }
            names.sort();
            let mut listing = names.join("\n");
            listing.push('\n');
            return Ok(Response::new(200, "text/plain", listing));
        }
        match fs::read(target) {
            Ok(body) => {
                let kind = content_type(target);
                let mut response = Response::new(200, kind, body);
                response
                    .headers
                    .push(("Content-Disposition".to_string(), disposition(kind).to_string()));
                Ok(response)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Response::status(404)),
            Err(e) => Err(e),
        }
    }

    fn post(&self, target: &Path, body: &[u8]) -> io::Result<Response> {
        if target == self.root || target.is_dir() {
            return Ok(Response::status(400));
        }
        let existed = target.exists();
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(target)?
            .write_all(body)?;
        Ok(Response::status(if existed { 200 } else { 201 }))
    }
}

/// Text is shown in place; anything else is offered as a download.
fn disposition(content_type: &str) -> &'static str {
    match content_type {
        "text/plain" | "text/html" => "inline",
        _ => "attachment",
    }
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("txt") | Some("md") => "text/plain",
        Some("html") | Some("htm") => "text/html",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("httpfs-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn request_survives_framing() {
        let req = Request::post("/notes.txt", "hello").with_header("User-Agent", "test");
        let parsed = Request::parse(&req.to_bytes()).unwrap();
        assert_eq!(parsed.method, Method::Post);
        assert_eq!(parsed.path, "/notes.txt");
        assert_eq!(parsed.header("user-agent"), Some("test"));
        assert_eq!(parsed.header("Content-Length"), Some("5"));
        assert_eq!(parsed.body, b"hello");
    }

    #[test]
    fn response_parse_reads_status_and_body() {
        let raw = b"HTTP/1.0 404 Not Found\r\nContent-Length: 3\r\n\r\nabcdef";
        let resp = Response::parse(raw).unwrap();
        assert_eq!(resp.status, 404);
        assert_eq!(resp.reason, "Not Found");
        assert_eq!(resp.body, b"abc");
        assert!(!resp.is_success());
    }

    #[test]
    fn malformed_messages_are_rejected() {
        assert_eq!(Request::parse(b"GET / HTTP/1.0"), Err(HttpError::Unterminated));
        assert!(matches!(
            Request::parse(b"DELETE /x HTTP/1.0\r\n\r\n"),
            Err(HttpError::Method(_))
        ));
        assert!(matches!(
            Request::parse(b"GET\r\n\r\n"),
            Err(HttpError::StartLine(_))
        ));
        assert!(matches!(
            Response::parse(b"nonsense\r\n\r\n"),
            Err(HttpError::StartLine(_))
        ));
    }

    #[test]
    fn post_then_get_round_trips() {
        let store = FileStore::new(scratch("post-get"));
        let created = store.handle(&Request::post("/a.txt", "first"));
        assert_eq!(created.status, 201);
        let appended = store.handle(&Request::post("/a.txt", " second"));
        assert_eq!(appended.status, 200);

        let got = store.handle(&Request::get("/a.txt"));
        assert_eq!(got.status, 200);
        assert_eq!(got.body, b"first second");
        assert_eq!(got.header("Content-Type"), Some("text/plain"));
        assert_eq!(got.header("Content-Disposition"), Some("inline"));
    }

    #[test]
    fn post_appends_and_creates_parents() {
        let root = scratch("append");
        let store = FileStore::new(&root);
        assert_eq!(store.handle(&Request::post("/logs/day.txt", "a\n")).status, 201);
        assert_eq!(store.handle(&Request::post("/logs/day.txt", "b\n")).status, 200);
        assert_eq!(fs::read(root.join("logs/day.txt")).unwrap(), b"a\nb\n");
    }

    #[test]
    fn binary_files_are_attachments() {
        let root = scratch("disposition");
        fs::write(root.join("blob.bin"), [0u8, 1, 2]).unwrap();
        fs::write(root.join("page.html"), "<p>hi</p>").unwrap();
        let store = FileStore::new(root);

        let blob = store.handle(&Request::get("/blob.bin"));
        assert_eq!(blob.header("Content-Type"), Some("application/octet-stream"));
        assert_eq!(blob.header("Content-Disposition"), Some("attachment"));

        let page = store.handle(&Request::get("/page.html"));
        assert_eq!(page.header("Content-Disposition"), Some("inline"));
    }

    #[test]
    fn root_lists_entries() {
        let root = scratch("listing");
        fs::write(root.join("b.txt"), "b").unwrap();
        fs::write(root.join("a.txt"), "a").unwrap();
        fs::create_dir(root.join("sub")).unwrap();
        let store = FileStore::new(root);
        let resp = store.handle(&Request::get("/"));
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, b"a.txt\nb.txt\nsub/\n");
    }

    #[test]
    fn missing_file_is_404() {
        let store = FileStore::new(scratch("missing"));
        assert_eq!(store.handle(&Request::get("/nope")).status, 404);
    }

    #[test]
    fn escaping_the_root_is_refused() {
        let store = FileStore::new(scratch("escape"));
        assert_eq!(store.handle(&Request::get("/../etc/passwd")).status, 403);
        assert_eq!(store.handle(&Request::post("/a/../../x", "x")).status, 403);
        assert_eq!(store.handle(&Request::get("relative")).status, 400);
        assert_eq!(store.handle(&Request::post("/", "x")).status, 400);
    }
}
