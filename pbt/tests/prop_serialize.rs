//! ワイヤフォーマット生成のプロパティテスト

use http11_conn::serialize::{
    encode_chunk_frame, encode_header_block, encode_status_line, has_connection_close,
    implicit_content_length,
};
use http11_conn::HeaderMap;
use http11_conn_pbt::{benign_header_name, body, header_value};
use proptest::prelude::*;

proptest! {
    /// チャンクフレームは `hex(len) CRLF data CRLF` (16 進小文字)
    #[test]
    fn chunk_frame_format(data in body()) {
        let mut buf = Vec::new();
        encode_chunk_frame(&mut buf, &data);

        let mut expected = format!("{:x}\r\n", data.len()).into_bytes();
        expected.extend_from_slice(&data);
        expected.extend_from_slice(b"\r\n");
        prop_assert_eq!(buf, expected);
    }

    /// ステータスラインは `HTTP/1.x SP code SP reason CRLF`
    #[test]
    fn status_line_format(
        http_1_1 in any::<bool>(),
        status in 100u16..=599,
        reason in "[A-Za-z][A-Za-z ]{0,24}",
    ) {
        let mut buf = Vec::new();
        encode_status_line(&mut buf, http_1_1, status, &reason);

        let version = if http_1_1 { "HTTP/1.1" } else { "HTTP/1.0" };
        let expected = format!("{} {} {}\r\n", version, status, reason).into_bytes();
        prop_assert_eq!(buf, expected);
    }

    /// ヘッダーブロックは挿入順のまま `name ": " value CRLF` の連続
    #[test]
    fn header_block_format(
        headers in proptest::collection::vec((benign_header_name(), header_value()), 0..8),
    ) {
        let map: HeaderMap = headers
            .iter()
            .cloned()
            .collect();
        let mut buf = Vec::new();
        encode_header_block(&mut buf, &map);

        let mut expected = Vec::new();
        for (name, value) in &headers {
            expected.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        prop_assert_eq!(buf, expected);
    }

    /// close トークンの検出はカンマ区切り・大文字小文字非依存
    #[test]
    fn connection_close_detection(
        tokens in proptest::collection::vec(
            prop_oneof![
                Just("close"), Just("CLOSE"), Just(" Close "),
                Just("keep-alive"), Just("upgrade"), Just("x-opt"),
            ],
            0..4,
        ),
    ) {
        let mut headers = HeaderMap::new();
        if !tokens.is_empty() {
            headers.insert("Connection", tokens.join(","));
        }

        let expected = tokens
            .iter()
            .any(|t| t.trim().eq_ignore_ascii_case("close"));
        prop_assert_eq!(has_connection_close(&headers), expected);
    }

    /// content-length 自動付与の抑止条件
    #[test]
    fn implicit_content_length_rule(
        status in 100u16..=599,
        connect_request in any::<bool>(),
        has_header in any::<bool>(),
    ) {
        let mut headers = HeaderMap::new();
        if has_header {
            headers.insert("Content-Length", "5");
        }

        let expected = has_header
            || status / 100 == 1
            || status == 204
            || (connect_request && status / 100 == 2);
        prop_assert_eq!(
            implicit_content_length(&headers, status, connect_request),
            expected
        );
    }
}
