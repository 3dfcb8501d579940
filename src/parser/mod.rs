//! インクリメンタルな HTTP/1.x リクエストパーサー
//!
//! コールバック駆動のストリーミングパーサー。入力を先頭から解釈し、
//! 行単位で消費できたバイト数を返す。行が途中で切れている場合は
//! そこまでで止まり、呼び出し側が続きのデータを足して再実行する。
//!
//! エンコード済みメッセージを組み立てる側は [`crate::serialize`] を
//! 参照。
//!
//! ## 使い方
//!
//! ```ignore
//! use http11_conn::parser::{ParseStatus, RequestParser};
//!
//! let mut parser = RequestParser::new();
//! let outcome = parser.execute(&mut sink, b"GET / HTTP/1.1\r\n\r\n")?;
//! assert_eq!(outcome.status, ParseStatus::Stopped);
//! ```

mod phase;
mod sink;

use std::fmt;

use crate::method;

use phase::ParsePhase;
pub use sink::{HeadersInfo, HttpVersion, ParseControl, ParseSink};

/// パースエラー
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// リクエストラインが不正
    InvalidRequestLine(String),
    /// 認識できないメソッド
    UnknownMethod(String),
    /// バージョン表記が不正
    InvalidVersion(String),
    /// ヘッダー行が不正
    InvalidHeader(String),
    /// Content-Length が不正
    InvalidContentLength(String),
    /// Transfer-Encoding が不正
    InvalidTransferEncoding(String),
    /// チャンクサイズ行が不正
    InvalidChunkSize(String),
    /// チャンクデータ後の CRLF がない
    InvalidChunkTerminator,
    /// 不正なデータ
    InvalidData(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::InvalidRequestLine(msg) => write!(f, "invalid request line: {}", msg),
            ParseError::UnknownMethod(token) => write!(f, "unknown method: {}", token),
            ParseError::InvalidVersion(msg) => write!(f, "invalid HTTP version: {}", msg),
            ParseError::InvalidHeader(msg) => write!(f, "invalid header line: {}", msg),
            ParseError::InvalidContentLength(msg) => write!(f, "invalid Content-Length: {}", msg),
            ParseError::InvalidTransferEncoding(msg) => {
                write!(f, "invalid Transfer-Encoding: {}", msg)
            }
            ParseError::InvalidChunkSize(msg) => write!(f, "invalid chunk size: {}", msg),
            ParseError::InvalidChunkTerminator => write!(f, "missing CRLF after chunk data"),
            ParseError::InvalidData(msg) => write!(f, "invalid data: {}", msg),
        }
    }
}

impl std::error::Error for ParseError {}

/// 1 回の実行結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Execute {
    /// 消費したバイト数
    pub consumed: usize,
    /// 停止理由
    pub status: ParseStatus,
}

/// パーサーが停止した理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    /// 続きのデータが必要
    NeedMore,
    /// コールバックが停止を指示した
    Stopped,
}

/// HTTP/1.x リクエストパーサー
///
/// 1 つのメッセージをパースし終えると、次のメッセージの先頭から
/// 再開できる。コールバックが message-complete で
/// [`ParseControl::Stop`] を返した場合、パイプラインされた後続
/// バイトには手を付けない。
#[derive(Debug)]
pub struct RequestParser {
    phase: ParsePhase,
    method: usize,
    version: HttpVersion,
    connection_close: bool,
    connection_keep_alive: bool,
    saw_upgrade_header: bool,
    content_length: Option<usize>,
    chunked: bool,
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestParser {
    /// 新しいパーサーを作成
    pub fn new() -> Self {
        Self {
            phase: ParsePhase::Idle,
            method: 0,
            version: HttpVersion { major: 1, minor: 1 },
            connection_close: false,
            connection_keep_alive: false,
            saw_upgrade_header: false,
            content_length: None,
            chunked: false,
        }
    }

    /// パーサーを初期状態に戻す
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// 現在のメッセージで keep-alive を許容するか
    ///
    /// close トークンが最優先、次に keep-alive トークン、どちらもなければ
    /// HTTP/1.1 以上でのみ許容する (RFC 9112 Section 9.3)。
    pub fn should_keep_alive(&self) -> bool {
        if self.connection_close {
            return false;
        }
        if self.connection_keep_alive {
            return true;
        }
        self.version.major == 1 && self.version.minor >= 1
    }

    /// 現在のメッセージがプロトコル切り替えを要求しているか
    pub fn upgrade_requested(&self) -> bool {
        self.saw_upgrade_header || self.method == method::CONNECT
    }

    /// 入力を先頭から解釈し、イベントを `sink` に通知する
    ///
    /// 戻り値の `consumed` は完全に処理できたバイト数。途中で切れた行は
    /// 消費されないので、呼び出し側は未消費部分を保持して続きのデータを
    /// 足してから再実行する。
    pub fn execute<S: ParseSink>(
        &mut self,
        sink: &mut S,
        data: &[u8],
    ) -> Result<Execute, ParseError> {
        let mut pos = 0;

        loop {
            match self.phase {
                ParsePhase::Idle => {
                    if pos == data.len() {
                        return Ok(Execute {
                            consumed: pos,
                            status: ParseStatus::NeedMore,
                        });
                    }
                    self.begin_message();
                    sink.on_message_begin();
                    self.phase = ParsePhase::RequestLine;
                }
                ParsePhase::RequestLine => {
                    let rest = &data[pos..];
                    let Some(line_end) = find_line(rest) else {
                        return Ok(Execute {
                            consumed: pos,
                            status: ParseStatus::NeedMore,
                        });
                    };
                    let line = line_str(&rest[..line_end])?;
                    let (method_index, target, version) = parse_request_line(line)?;
                    self.method = method_index;
                    self.version = version;
                    pos += line_end + 2;
                    sink.on_url(target);
                    self.phase = ParsePhase::Headers;
                }
                ParsePhase::Headers => {
                    let rest = &data[pos..];
                    let Some(line_end) = find_line(rest) else {
                        return Ok(Execute {
                            consumed: pos,
                            status: ParseStatus::NeedMore,
                        });
                    };
                    if line_end == 0 {
                        // 空行 = ヘッダーブロック終端
                        pos += 2;
                        self.resolve_framing()?;
                        let info = HeadersInfo {
                            method: self.method,
                            version: self.version,
                            should_keep_alive: self.should_keep_alive(),
                        };
                        if sink.on_headers_complete(&info) == ParseControl::Stop {
                            return Ok(Execute {
                                consumed: pos,
                                status: ParseStatus::Stopped,
                            });
                        }
                        self.phase = self.body_phase();
                    } else {
                        let line = line_str(&rest[..line_end])?;
                        let (name, value) = split_header_line(line)?;
                        self.inspect_header(name, value)?;
                        pos += line_end + 2;
                        sink.on_header_field(self.version, name);
                        sink.on_header_value(value);
                    }
                }
                ParsePhase::BodyIdentity { remaining } => {
                    let available = (data.len() - pos).min(remaining);
                    if available == 0 {
                        return Ok(Execute {
                            consumed: pos,
                            status: ParseStatus::NeedMore,
                        });
                    }
                    let is_final = available == remaining;
                    sink.on_body(&data[pos..pos + available], is_final);
                    pos += available;
                    self.phase = if is_final {
                        ParsePhase::Done
                    } else {
                        ParsePhase::BodyIdentity {
                            remaining: remaining - available,
                        }
                    };
                }
                ParsePhase::ChunkSize => {
                    let rest = &data[pos..];
                    let Some(line_end) = find_line(rest) else {
                        return Ok(Execute {
                            consumed: pos,
                            status: ParseStatus::NeedMore,
                        });
                    };
                    let line = line_str(&rest[..line_end])?;
                    let size = parse_chunk_size(line)?;
                    pos += line_end + 2;
                    if size == 0 {
                        // 終端チャンク。ボディの最終断片として通知する
                        sink.on_body(&[], true);
                        self.phase = ParsePhase::Trailers;
                    } else {
                        self.phase = ParsePhase::ChunkData { remaining: size };
                    }
                }
                ParsePhase::ChunkData { remaining } => {
                    let available = (data.len() - pos).min(remaining);
                    if available == 0 {
                        return Ok(Execute {
                            consumed: pos,
                            status: ParseStatus::NeedMore,
                        });
                    }
                    sink.on_body(&data[pos..pos + available], false);
                    pos += available;
                    self.phase = if available == remaining {
                        ParsePhase::ChunkDataCrlf
                    } else {
                        ParsePhase::ChunkData {
                            remaining: remaining - available,
                        }
                    };
                }
                ParsePhase::ChunkDataCrlf => {
                    let rest = &data[pos..];
                    if rest.len() < 2 {
                        return Ok(Execute {
                            consumed: pos,
                            status: ParseStatus::NeedMore,
                        });
                    }
                    if &rest[..2] != b"\r\n" {
                        return Err(ParseError::InvalidChunkTerminator);
                    }
                    pos += 2;
                    self.phase = ParsePhase::ChunkSize;
                }
                ParsePhase::Trailers => {
                    let rest = &data[pos..];
                    let Some(line_end) = find_line(rest) else {
                        return Ok(Execute {
                            consumed: pos,
                            status: ParseStatus::NeedMore,
                        });
                    };
                    if line_end == 0 {
                        pos += 2;
                        self.phase = ParsePhase::Done;
                    } else {
                        let line = line_str(&rest[..line_end])?;
                        let (name, value) = split_header_line(line)?;
                        pos += line_end + 2;
                        sink.on_header_field(self.version, name);
                        sink.on_header_value(value);
                    }
                }
                ParsePhase::Done => {
                    let control = sink.on_message_complete(self.upgrade_requested());
                    self.phase = ParsePhase::Idle;
                    if control == ParseControl::Stop {
                        return Ok(Execute {
                            consumed: pos,
                            status: ParseStatus::Stopped,
                        });
                    }
                }
            }
        }
    }

    /// メッセージ単位の状態を初期化
    fn begin_message(&mut self) {
        self.method = 0;
        self.version = HttpVersion { major: 1, minor: 1 };
        self.connection_close = false;
        self.connection_keep_alive = false;
        self.saw_upgrade_header = false;
        self.content_length = None;
        self.chunked = false;
    }

    /// ヘッダー終端時にボディのフレーミングを確定する
    fn resolve_framing(&self) -> Result<(), ParseError> {
        // RFC 9112 Section 6.2: 両方が指定されたメッセージは拒否する
        if self.chunked && self.content_length.is_some() {
            return Err(ParseError::InvalidData(
                "both Transfer-Encoding and Content-Length".to_string(),
            ));
        }
        Ok(())
    }

    /// ヘッダー終端後の遷移先
    fn body_phase(&self) -> ParsePhase {
        // CONNECT はヘッダーで完結する
        if self.method == method::CONNECT {
            return ParsePhase::Done;
        }
        if self.chunked {
            return ParsePhase::ChunkSize;
        }
        match self.content_length {
            Some(len) if len > 0 => ParsePhase::BodyIdentity { remaining: len },
            _ => ParsePhase::Done,
        }
    }

    /// フレーミングと接続制御に関わるヘッダーを記録する
    fn inspect_header(&mut self, name: &str, value: &str) -> Result<(), ParseError> {
        if name.eq_ignore_ascii_case("connection") {
            for token in value.split(',') {
                let token = token.trim();
                if token.eq_ignore_ascii_case("close") {
                    self.connection_close = true;
                } else if token.eq_ignore_ascii_case("keep-alive") {
                    self.connection_keep_alive = true;
                }
            }
        } else if name.eq_ignore_ascii_case("content-length") {
            let parsed = parse_content_length_value(value)?;
            if let Some(previous) = self.content_length {
                if previous != parsed {
                    return Err(ParseError::InvalidContentLength(
                        "mismatched values".to_string(),
                    ));
                }
            } else {
                self.content_length = Some(parsed);
            }
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            let mut has_token = false;
            for token in value.split(',') {
                let token = token.trim();
                if token.is_empty() {
                    return Err(ParseError::InvalidTransferEncoding(
                        "empty token".to_string(),
                    ));
                }
                has_token = true;
                if !token.eq_ignore_ascii_case("chunked") {
                    return Err(ParseError::InvalidTransferEncoding(format!(
                        "unsupported coding: {}",
                        token
                    )));
                }
            }
            if !has_token {
                return Err(ParseError::InvalidTransferEncoding(
                    "empty value".to_string(),
                ));
            }
            self.chunked = true;
        } else if name.eq_ignore_ascii_case("upgrade") {
            self.saw_upgrade_header = true;
        }
        Ok(())
    }
}

/// CRLF で終わる行を探す
fn find_line(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// 行を UTF-8 文字列として取り出す
fn line_str(line: &[u8]) -> Result<&str, ParseError> {
    std::str::from_utf8(line).map_err(|e| ParseError::InvalidData(format!("invalid UTF-8: {e}")))
}

/// リクエストラインをパース: METHOD SP target SP VERSION
fn parse_request_line(line: &str) -> Result<(usize, &str, HttpVersion), ParseError> {
    if line.contains('\r') || line.contains('\n') {
        return Err(ParseError::InvalidRequestLine(
            "contains bare CR/LF".to_string(),
        ));
    }

    let mut parts = line.splitn(3, ' ');
    let (Some(method_token), Some(target), Some(version_token)) =
        (parts.next(), parts.next(), parts.next())
    else {
        return Err(ParseError::InvalidRequestLine(line.to_string()));
    };

    if target.is_empty() || version_token.contains(' ') {
        return Err(ParseError::InvalidRequestLine(line.to_string()));
    }

    let method_index =
        method::lookup(method_token).ok_or_else(|| ParseError::UnknownMethod(method_token.to_string()))?;
    let version = parse_version(version_token)?;

    Ok((method_index, target, version))
}

/// バージョン表記をパース: HTTP/D.D
fn parse_version(token: &str) -> Result<HttpVersion, ParseError> {
    let digits = token
        .strip_prefix("HTTP/")
        .ok_or_else(|| ParseError::InvalidVersion(token.to_string()))?;
    let bytes = digits.as_bytes();
    if bytes.len() != 3 || bytes[1] != b'.' || !bytes[0].is_ascii_digit() || !bytes[2].is_ascii_digit()
    {
        return Err(ParseError::InvalidVersion(token.to_string()));
    }
    Ok(HttpVersion {
        major: bytes[0] - b'0',
        minor: bytes[2] - b'0',
    })
}

/// ヘッダー行を名前と値に分割する
///
/// 名前は原文のまま返す。値は先頭の SP/HT のみ取り除き、末尾の空白は
/// 呼び出し側の整形に委ねる。
fn split_header_line(line: &str) -> Result<(&str, &str), ParseError> {
    if line.starts_with(' ') || line.starts_with('\t') {
        return Err(ParseError::InvalidHeader("obs-fold".to_string()));
    }
    if line.contains('\r') || line.contains('\n') {
        return Err(ParseError::InvalidHeader("contains bare CR/LF".to_string()));
    }

    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| ParseError::InvalidHeader("missing colon".to_string()))?;
    if name.is_empty() || !name.bytes().all(is_token_char) {
        return Err(ParseError::InvalidHeader(format!("invalid name: {}", name)));
    }

    Ok((name, value.trim_start_matches([' ', '\t'])))
}

/// チャンクサイズ行をパース (チャンク拡張は無視)
fn parse_chunk_size(line: &str) -> Result<usize, ParseError> {
    let size_str = line.split(';').next().unwrap_or(line).trim();
    usize::from_str_radix(size_str, 16).map_err(|_| ParseError::InvalidChunkSize(line.to_string()))
}

/// Content-Length 値をパース
fn parse_content_length_value(input: &str) -> Result<usize, ParseError> {
    let input = input.trim();
    if input.is_empty() || !input.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::InvalidContentLength(
            "not a number".to_string(),
        ));
    }
    input
        .parse::<usize>()
        .map_err(|_| ParseError::InvalidContentLength("overflow".to_string()))
}

/// トークン文字か確認 (RFC 9110 Section 5.6.2)
fn is_token_char(b: u8) -> bool {
    matches!(
        b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' |
        b'0'..=b'9' | b'A'..=b'Z' | b'^' | b'_' | b'`' | b'a'..=b'z' | b'|' | b'~'
    )
}
