//! # http11_conn
//!
//! HTTP/1.x サーバー側接続エンジン
//!
//! 任意の非同期バイトストリーム ([`tokio::io::AsyncRead`] +
//! [`tokio::io::AsyncWrite`]) の上で、HTTP/1.0 / HTTP/1.1 の
//! リクエスト・レスポンス交換を 1 つずつ処理する。
//!
//! ## 特徴
//!
//! - **トランスポート非依存**: TCP でも TLS ストリームでも
//!   インメモリのストリームでも動く
//! - **インクリメンタル**: 固定容量の受信バッファを
//!   スライディングウィンドウとして使い、部分受信と
//!   パイプラインされたバイト列を正しく扱う
//! - **フレーミング自動化**: `content-length` / `connection: close` /
//!   `transfer-encoding: chunked` をメッセージ内容と接続状態から決める
//! - **100 Continue / トレーラー / keep-alive** 対応
//!
//! ## 使い方
//!
//! ```ignore
//! use http11_conn::{BufferedMessage, Connection};
//!
//! let (stream, _) = listener.accept().await?;
//! let mut conn = Connection::new(stream, 8192)?;
//! conn.open();
//!
//! let (mut method, mut path) = (String::new(), String::new());
//! let mut request = BufferedMessage::new();
//! conn.read_request(&mut method, &mut path, &mut request).await?;
//!
//! let mut response = BufferedMessage::new();
//! response.headers.insert("content-type", "text/plain");
//! response.body.extend_from_slice(b"Hello, World!");
//! conn.write_response(200, "OK", &response).await?;
//! ```
//!
//! チャンクストリーミングは
//! [`write_response_metadata`](Connection::write_response_metadata) /
//! [`write_chunk`](Connection::write_chunk) /
//! [`write_trailers`](Connection::write_trailers) /
//! [`write_end_of_message`](Connection::write_end_of_message) を参照。

mod connection;
mod error;
mod headers;
mod message;
pub mod method;
pub mod parser;
pub mod serialize;
mod state;
mod visitor;

pub use connection::Connection;
pub use error::{Error, Result};
pub use headers::HeaderMap;
pub use message::{BufferedMessage, Message};
pub use state::{ReadState, WriteState};
