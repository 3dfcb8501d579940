//! レスポンスのワイヤフォーマット生成
//!
//! レスポンス各フェーズのバイト列を組み立てる低レベル関数群。接続は
//! これらを使って書き込みバッファに 1 フェーズ分を構築し、一度の
//! write で送信する。
//!
//! ## フォーマット
//!
//! - ステータスライン: `HTTP/1.x SP 3DIGIT SP reason-phrase CRLF`
//! - ヘッダー: `name ": " value CRLF` (挿入順)
//! - チャンク: サイズを 16 進小文字 (`0x` プレフィックスなし、先頭ゼロ
//!   なし) で出力し、`CRLF data CRLF` が続く (RFC 9112 Section 7.1)

use crate::headers::HeaderMap;

/// 100 Continue レスポンスのリテラル
pub const CONTINUE_RESPONSE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// 対応していない HTTP バージョンへの既定レスポンス
pub const VERSION_NOT_SUPPORTED_RESPONSE: &[u8] = b"HTTP/1.1 505 HTTP Version Not Supported\r\n\
Content-Length: 48\r\n\
Connection: close\r\n\
\r\n\
This server only supports HTTP/1.0 and HTTP/1.1\n";

/// 終端チャンク (トレーラーなし)
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// ステータスラインを書き込む
pub fn encode_status_line(buf: &mut Vec<u8>, http_1_1: bool, status_code: u16, reason: &str) {
    buf.extend_from_slice(if http_1_1 {
        b"HTTP/1.1 "
    } else {
        b"HTTP/1.0 "
    });
    buf.extend_from_slice(status_code.to_string().as_bytes());
    buf.push(b' ');
    buf.extend_from_slice(reason.as_bytes());
    buf.extend_from_slice(b"\r\n");
}

/// ヘッダーブロックを書き込む (終端の空行は含まない)
pub fn encode_header_block(buf: &mut Vec<u8>, headers: &HeaderMap) {
    for (name, value) in headers {
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(value.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
}

/// チャンク 1 つ分のフレームを書き込む
///
/// 空データでは終端チャンク `0\r\n\r\n` と同じバイト列になる。
///
/// ```rust
/// let mut buf = Vec::new();
/// http11_conn::serialize::encode_chunk_frame(&mut buf, b"ab");
/// assert_eq!(buf, b"2\r\nab\r\n");
/// ```
pub fn encode_chunk_frame(buf: &mut Vec<u8>, data: &[u8]) {
    buf.extend_from_slice(format!("{:x}", data.len()).as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
}

/// Connection ヘッダーに close トークンが含まれるか
///
/// 同名ヘッダーが複数あればすべて検査する。値はカンマ区切りの
/// トークンリストとして扱い、照合は大文字小文字を区別しない
/// (RFC 9110 Section 7.6.1)。
pub fn has_connection_close(headers: &HeaderMap) -> bool {
    headers.get_all("connection").iter().any(|value| {
        value
            .split(',')
            .any(|token| token.trim().eq_ignore_ascii_case("close"))
    })
}

/// content-length ヘッダーを自動付与しない条件
///
/// 次のいずれかで真になる:
/// - メッセージが既に content-length を持つ
/// - ステータスが 1xx または 204
/// - CONNECT リクエストへの 2xx レスポンス
pub fn implicit_content_length(
    headers: &HeaderMap,
    status_code: u16,
    connect_request: bool,
) -> bool {
    headers.contains("content-length")
        || status_code / 100 == 1
        || status_code == 204
        || (connect_request && status_code / 100 == 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_line_versions() {
        let mut buf = Vec::new();
        encode_status_line(&mut buf, true, 200, "OK");
        assert_eq!(buf, b"HTTP/1.1 200 OK\r\n");

        buf.clear();
        encode_status_line(&mut buf, false, 404, "Not Found");
        assert_eq!(buf, b"HTTP/1.0 404 Not Found\r\n");
    }

    #[test]
    fn header_block_order() {
        let mut headers = HeaderMap::new();
        headers.insert("x-b", "2");
        headers.insert("x-a", "1");
        let mut buf = Vec::new();
        encode_header_block(&mut buf, &headers);
        assert_eq!(buf, b"x-b: 2\r\nx-a: 1\r\n");
    }

    #[test]
    fn chunk_frame_hex_lowercase() {
        let mut buf = Vec::new();
        encode_chunk_frame(&mut buf, &[0u8; 255]);
        assert!(buf.starts_with(b"ff\r\n"));
        assert!(buf.ends_with(b"\r\n"));
        assert_eq!(buf.len(), 4 + 255 + 2);
    }

    #[test]
    fn chunk_frame_small() {
        let mut buf = Vec::new();
        encode_chunk_frame(&mut buf, b"ab");
        assert_eq!(buf, b"2\r\nab\r\n");
    }

    #[test]
    fn chunk_frame_empty_is_last_chunk() {
        let mut buf = Vec::new();
        encode_chunk_frame(&mut buf, b"");
        assert_eq!(buf, LAST_CHUNK);
    }

    #[test]
    fn connection_close_tokens() {
        let mut headers = HeaderMap::new();
        headers.insert("Connection", "keep-alive, CLOSE");
        assert!(has_connection_close(&headers));

        let mut headers = HeaderMap::new();
        headers.insert("connection", "closer");
        assert!(!has_connection_close(&headers));

        let mut headers = HeaderMap::new();
        headers.insert("connection", "upgrade");
        headers.insert("connection", " close ");
        assert!(has_connection_close(&headers));

        assert!(!has_connection_close(&HeaderMap::new()));
    }

    #[test]
    fn implicit_content_length_cases() {
        let empty = HeaderMap::new();
        assert!(implicit_content_length(&empty, 100, false));
        assert!(implicit_content_length(&empty, 101, false));
        assert!(implicit_content_length(&empty, 204, false));
        assert!(!implicit_content_length(&empty, 200, false));
        assert!(!implicit_content_length(&empty, 304, false));
        assert!(implicit_content_length(&empty, 200, true));
        assert!(implicit_content_length(&empty, 299, true));
        assert!(!implicit_content_length(&empty, 404, true));

        let mut with_len = HeaderMap::new();
        with_len.insert("Content-Length", "10");
        assert!(implicit_content_length(&with_len, 200, false));
    }

    #[test]
    fn canned_505_content_length_matches_body() {
        let text = std::str::from_utf8(VERSION_NOT_SUPPORTED_RESPONSE).unwrap();
        let body = text.split("\r\n\r\n").nth(1).unwrap();
        assert_eq!(body.len(), 48);
    }
}
