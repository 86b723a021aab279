/*!
An incremental HTTP/1.x request parser.

The request is parsed in a pipeline of three stages — request line,
headers, body — same as the finite-state design this crate grew out of.
Unlike that design, this parser does not build the request itself: it
only recognizes syntax and invokes [`ParserCallbacks`] as it goes, the same
split of responsibility the engine's required parser interface describes
(`feed_data`, `get_http_version`, `should_keep_alive`, and the four
callbacks). [`crate::engine`]'s per-connection callback sink is the one
that turns those callbacks into a [`Request`](crate::http::request::Request).

A single [`RequestParser`] instance is reused across every pipelined
message on one connection: completing a message resets the per-message
state (content-length, chunk state, `Connection` token) and loops straight
back into request-line parsing, so that `feed()` can walk through an
arbitrary number of back-to-back messages buffered in one read.
*/

use crate::config::ServerConfig;

/// Sink for parser events. [`crate::engine`]'s per-connection callback sink
/// is the only production implementer; split out as a trait so tests can
/// drive the parser with a recording sink.
pub trait ParserCallbacks {
    /// A header line was recognized. `name` and `value` are the raw bytes;
    /// decoding and storage policy belongs to the sink.
    fn on_header(&mut self, name: &[u8], value: &[u8]);
    /// All headers for the current message have been seen. `http_version`
    /// and `keep_alive` are the parser's own reading of the request line
    /// and `Connection` header for this message.
    fn on_headers_complete(&mut self, http_version: &str, keep_alive: bool);
    /// A chunk of body bytes for the current message.
    fn on_body(&mut self, chunk: &[u8]);
    /// The current message (headers + body) is fully parsed.
    fn on_message_complete(&mut self);
}

#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    Malformed,
    RequestLineTooLong,
    HeadersTooLarge,
    BodyTooLarge,
    UnsupportedVersion,
}

#[derive(PartialEq, Eq, Clone, Copy)]
enum Phase {
    RequestLine,
    Headers,
    Body,
}

#[derive(Clone, Copy)]
enum ChunkPhase {
    Size,
    Data(usize),
    DataCrlf,
    Trailer,
}

#[derive(Clone, Copy)]
enum BodyMode {
    None,
    Fixed(usize),
    Chunked(ChunkPhase),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ConnectionToken {
    Close,
    KeepAlive,
}

pub struct RequestParser {
    buf: Vec<u8>,
    phase: Phase,
    body_mode: BodyMode,

    version_major: u8,
    version_minor: u8,
    connection_token: Option<ConnectionToken>,

    headers_bytes_parsed: usize,
    max_request_line_size: usize,
    max_header_size: usize,
    max_body_size: usize,
}

impl RequestParser {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            buf: Vec::new(),
            phase: Phase::RequestLine,
            body_mode: BodyMode::None,
            version_major: 1,
            version_minor: 1,
            connection_token: None,
            headers_bytes_parsed: 0,
            max_request_line_size: config.max_request_line_size,
            max_header_size: config.max_header_size,
            max_body_size: config.max_body_size,
        }
    }

    /// `"1.0"` or `"1.1"`, valid once the request line for the current
    /// message has been parsed.
    pub fn http_version(&self) -> String {
        format!("{}.{}", self.version_major, self.version_minor)
    }

    /// HTTP/1.1 defaults to keep-alive unless `Connection: close`;
    /// HTTP/1.0 defaults to close unless `Connection: keep-alive`. Valid
    /// once headers for the current message have been parsed.
    pub fn should_keep_alive(&self) -> bool {
        match (self.version_major, self.version_minor) {
            (1, 1) => self.connection_token != Some(ConnectionToken::Close),
            (1, 0) => self.connection_token == Some(ConnectionToken::KeepAlive),
            _ => false,
        }
    }

    fn find(&self, pattern: &[u8]) -> Option<usize> {
        self.buf
            .windows(pattern.len())
            .position(|window| window == pattern)
    }

    fn reset_for_next_message(&mut self) {
        self.body_mode = BodyMode::None;
        self.connection_token = None;
        self.headers_bytes_parsed = 0;
        self.phase = Phase::RequestLine;
    }

    /// Feeds newly received bytes into the parser, invoking `sink` for
    /// every callback raised while consuming them. A single call may walk
    /// through any number of complete pipelined messages buffered in
    /// `data` plus whatever was left over from a previous call.
    pub fn feed(&mut self, data: &[u8], sink: &mut impl ParserCallbacks) -> Result<(), ParseError> {
        self.buf.extend_from_slice(data);

        loop {
            let progressed = match self.phase {
                Phase::RequestLine => self.parse_request_line()?,
                Phase::Headers => self.parse_header_line(sink)?,
                Phase::Body => self.parse_body(sink)?,
            };
            if !progressed {
                return Ok(());
            }
        }
    }

    /// Returns `Ok(true)` if a request line was consumed, `Ok(false)` if
    /// more data is needed.
    fn parse_request_line(&mut self) -> Result<bool, ParseError> {
        let end = match self.find(b"\r\n") {
            Some(idx) => idx,
            None => {
                if self.buf.len() > self.max_request_line_size {
                    return Err(ParseError::RequestLineTooLong);
                }
                return Ok(false);
            }
        };
        if end > self.max_request_line_size {
            return Err(ParseError::RequestLineTooLong);
        }

        let line = &self.buf[..end];
        let mut parts = line.split(|&b| b == b' ');
        let method = parts.next().ok_or(ParseError::Malformed)?;
        let _uri = parts.next().ok_or(ParseError::Malformed)?;
        let version = parts.next().ok_or(ParseError::Malformed)?;
        if parts.next().is_some() {
            return Err(ParseError::Malformed);
        }
        if method.is_empty() || !method.iter().all(|b| b.is_ascii_uppercase()) {
            return Err(ParseError::Malformed);
        }

        let version = std::str::from_utf8(version).map_err(|_| ParseError::Malformed)?;
        let (major, minor) = version
            .strip_prefix("HTTP/")
            .and_then(|v| v.split_once('.'))
            .ok_or(ParseError::Malformed)?;
        let major: u8 = major.parse().map_err(|_| ParseError::Malformed)?;
        let minor: u8 = minor.parse().map_err(|_| ParseError::Malformed)?;
        if major != 1 || (minor != 0 && minor != 1) {
            return Err(ParseError::UnsupportedVersion);
        }
        self.version_major = major;
        self.version_minor = minor;

        self.buf.drain(..end + 2);
        self.phase = Phase::Headers;
        Ok(true)
    }

    fn parse_header_line(&mut self, sink: &mut impl ParserCallbacks) -> Result<bool, ParseError> {
        let end = match self.find(b"\r\n") {
            Some(idx) => idx,
            None => {
                if self.headers_bytes_parsed + self.buf.len() > self.max_header_size {
                    return Err(ParseError::HeadersTooLarge);
                }
                return Ok(false);
            }
        };

        self.headers_bytes_parsed += end + 2;
        if self.headers_bytes_parsed > self.max_header_size {
            return Err(ParseError::HeadersTooLarge);
        }

        if end == 0 {
            // Blank line: headers are complete.
            self.buf.drain(..2);
            self.finish_headers(sink)?;
            return Ok(true);
        }

        let line: Vec<u8> = self.buf[..end].to_vec();
        self.buf.drain(..end + 2);

        let colon = line
            .iter()
            .position(|&b| b == b':')
            .ok_or(ParseError::Malformed)?;
        let name = &line[..colon];
        let value = trim_ascii(&line[colon + 1..]);
        if name.is_empty() {
            return Err(ParseError::Malformed);
        }

        self.track_header(name, value);
        sink.on_header(name, value);
        Ok(true)
    }

    /// Updates the parser's own view of `Content-Length`,
    /// `Transfer-Encoding` and `Connection` — independent of whatever the
    /// sink chooses to keep in its header map.
    fn track_header(&mut self, name: &[u8], value: &[u8]) {
        if name.eq_ignore_ascii_case(b"connection") {
            if contains_token(value, b"close") {
                self.connection_token = Some(ConnectionToken::Close);
            } else if contains_token(value, b"keep-alive") {
                self.connection_token = Some(ConnectionToken::KeepAlive);
            }
        } else if name.eq_ignore_ascii_case(b"transfer-encoding") {
            if contains_token(value, b"chunked") {
                self.body_mode = BodyMode::Chunked(ChunkPhase::Size);
            }
        } else if name.eq_ignore_ascii_case(b"content-length") {
            if matches!(self.body_mode, BodyMode::None) {
                if let Ok(s) = std::str::from_utf8(value) {
                    if let Ok(n) = s.parse::<usize>() {
                        self.body_mode = BodyMode::Fixed(n);
                    }
                }
            }
        }
    }

    fn finish_headers(&mut self, sink: &mut impl ParserCallbacks) -> Result<(), ParseError> {
        if let BodyMode::Fixed(n) = self.body_mode {
            if n > self.max_body_size {
                return Err(ParseError::BodyTooLarge);
            }
        }
        let version = self.http_version();
        let keep_alive = self.should_keep_alive();
        sink.on_headers_complete(&version, keep_alive);
        self.phase = Phase::Body;
        Ok(())
    }

    fn parse_body(&mut self, sink: &mut impl ParserCallbacks) -> Result<bool, ParseError> {
        match self.body_mode {
            BodyMode::None => {
                sink.on_message_complete();
                self.reset_for_next_message();
                Ok(true)
            }
            BodyMode::Fixed(remaining) => {
                if remaining == 0 {
                    sink.on_message_complete();
                    self.reset_for_next_message();
                    return Ok(true);
                }
                if self.buf.is_empty() {
                    return Ok(false);
                }
                let take = remaining.min(self.buf.len());
                sink.on_body(&self.buf[..take]);
                self.buf.drain(..take);
                self.body_mode = BodyMode::Fixed(remaining - take);
                Ok(true)
            }
            BodyMode::Chunked(chunk_phase) => self.parse_chunk(chunk_phase, sink),
        }
    }

    fn parse_chunk(
        &mut self,
        chunk_phase: ChunkPhase,
        sink: &mut impl ParserCallbacks,
    ) -> Result<bool, ParseError> {
        match chunk_phase {
            ChunkPhase::Size => {
                let end = match self.find(b"\r\n") {
                    Some(idx) => idx,
                    None => {
                        if self.buf.len() > self.max_header_size {
                            return Err(ParseError::Malformed);
                        }
                        return Ok(false);
                    }
                };
                let line = &self.buf[..end];
                let size_str = line
                    .split(|&b| b == b';')
                    .next()
                    .and_then(|s| std::str::from_utf8(s).ok())
                    .map(str::trim)
                    .ok_or(ParseError::Malformed)?;
                let size =
                    usize::from_str_radix(size_str, 16).map_err(|_| ParseError::Malformed)?;
                if size > self.max_body_size {
                    return Err(ParseError::BodyTooLarge);
                }
                self.buf.drain(..end + 2);
                self.body_mode = BodyMode::Chunked(if size == 0 {
                    ChunkPhase::Trailer
                } else {
                    ChunkPhase::Data(size)
                });
                Ok(true)
            }
            ChunkPhase::Data(remaining) => {
                if remaining == 0 {
                    self.body_mode = BodyMode::Chunked(ChunkPhase::DataCrlf);
                    return Ok(true);
                }
                if self.buf.is_empty() {
                    return Ok(false);
                }
                let take = remaining.min(self.buf.len());
                sink.on_body(&self.buf[..take]);
                self.buf.drain(..take);
                self.body_mode = BodyMode::Chunked(ChunkPhase::Data(remaining - take));
                Ok(true)
            }
            ChunkPhase::DataCrlf => {
                if self.buf.len() < 2 {
                    return Ok(false);
                }
                if &self.buf[..2] != b"\r\n" {
                    return Err(ParseError::Malformed);
                }
                self.buf.drain(..2);
                self.body_mode = BodyMode::Chunked(ChunkPhase::Size);
                Ok(true)
            }
            ChunkPhase::Trailer => {
                let end = match self.find(b"\r\n") {
                    Some(idx) => idx,
                    None => return Ok(false),
                };
                if end == 0 {
                    self.buf.drain(..2);
                    sink.on_message_complete();
                    self.reset_for_next_message();
                } else {
                    // Trailer header: ignored, but still consumed.
                    self.buf.drain(..end + 2);
                }
                Ok(true)
            }
        }
    }
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map(|i| i + 1)
        .unwrap_or(start);
    &bytes[start..end]
}

fn contains_token(value: &[u8], token: &[u8]) -> bool {
    value
        .split(|&b| b == b',')
        .any(|part| trim_ascii(part).eq_ignore_ascii_case(token))
}
