use std::fmt;
use std::io;

use crate::parser::ParseError;

/// 接続エンジンのエラー
#[derive(Debug)]
pub enum Error {
    /// 現在の状態では許可されない操作
    OutOfOrder,
    /// HTTP/1.0 接続でのチャンクストリーミング要求
    NativeStreamUnsupported,
    /// 入力バッファが満杯でパースが進まない
    BufferExhausted,
    /// 受信データが HTTP 文法に違反している
    Parsing(ParseError),
    /// 入力バッファ容量が 0
    EmptyBuffer,
    /// トランスポートが相手側から閉じられた
    ConnectionClosed,
    /// I/O エラー
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OutOfOrder => write!(f, "operation out of order"),
            Error::NativeStreamUnsupported => {
                write!(f, "native stream unsupported on HTTP/1.0")
            }
            Error::BufferExhausted => write!(f, "input buffer exhausted"),
            Error::Parsing(e) => write!(f, "parse error: {}", e),
            Error::EmptyBuffer => write!(f, "input buffer must not be 0-sized"),
            Error::ConnectionClosed => write!(f, "connection closed"),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Parsing(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Error::Parsing(e)
    }
}

/// Result 型エイリアス
pub type Result<T> = std::result::Result<T, Error>;
