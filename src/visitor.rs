//! パーサーイベントからメッセージへの橋渡し
//!
//! [`Visitor`] は [`ParseSink`](crate::parser::ParseSink) を実装し、
//! パーサーのイベントを呼び出し側のメソッド・パス・メッセージへ反映
//! する。ヘッダー名は逐次小文字化し、値は挿入時に末尾の SP/HT を
//! 取り除く。

use crate::message::Message;
use crate::method;
use crate::parser::{HeadersInfo, HttpVersion, ParseControl, ParseSink};
use crate::state::{ReadState, WriteGate, WriteState};

// 接続属性と読み取りマイルストーンのフラグ
pub(crate) const HTTP_1_1: u8 = 1 << 0;
pub(crate) const READY: u8 = 1 << 1;
pub(crate) const DATA: u8 = 1 << 2;
pub(crate) const END: u8 = 1 << 3;
pub(crate) const KEEP_ALIVE: u8 = 1 << 4;
pub(crate) const UPGRADE: u8 = 1 << 5;

/// 接続ごとのプロトコル状態
///
/// 読み書き状態、フラグ、パース中のヘッダーペアの作業領域を持つ。
#[derive(Debug)]
pub(crate) struct ProtoState {
    pub flags: u8,
    pub read_state: ReadState,
    pub write_gate: WriteGate,
    pub connect_request: bool,
    pub use_trailers: bool,
    pub last_name: String,
    pub last_value: String,
    pub have_pending_value: bool,
    pub version_rejected: bool,
}

impl ProtoState {
    pub fn new() -> Self {
        Self {
            flags: 0,
            read_state: ReadState::Empty,
            write_gate: WriteGate::new(WriteState::Empty),
            connect_request: false,
            use_trailers: false,
            last_name: String::new(),
            last_value: String::new(),
            have_pending_value: false,
            version_rejected: false,
        }
    }

    pub fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    /// 作業中のヘッダーペアを破棄する
    pub fn clear_pending_header(&mut self) {
        self.last_name.clear();
        self.last_value.clear();
        self.have_pending_value = false;
    }
}

/// メッセージの全区画を空にする
pub(crate) fn clear_message<M: Message>(message: &mut M) {
    message.headers_mut().clear();
    message.body_mut().clear();
    message.trailers_mut().clear();
}

/// 読み取り操作 1 回分のイベント受け口
///
/// `method` と `path` はヘッダー読み取り時のみ渡される。
pub(crate) struct Visitor<'a, M: Message> {
    pub proto: &'a mut ProtoState,
    pub method: Option<&'a mut String>,
    pub path: Option<&'a mut String>,
    pub message: &'a mut M,
}

impl<M: Message> Visitor<'_, M> {
    /// 完成したヘッダーペアをメッセージへ移す
    ///
    /// HTTP/1.0 では expect と upgrade を格納しない。値は末尾の
    /// SP/HT を取り除いてから挿入する。
    fn flush_pending_header(&mut self, suppress_http10: bool) {
        let proto = &mut *self.proto;
        if suppress_http10 && (proto.last_name == "expect" || proto.last_name == "upgrade") {
            return;
        }
        let value = proto.last_value.trim_end_matches([' ', '\t']);
        let dest = if proto.use_trailers {
            self.message.trailers_mut()
        } else {
            self.message.headers_mut()
        };
        dest.insert(proto.last_name.as_str(), value);
    }
}

impl<M: Message> ParseSink for Visitor<'_, M> {
    fn on_message_begin(&mut self) {
        self.proto.flags = 0;
        self.proto.use_trailers = false;
        clear_message(self.message);
    }

    fn on_url(&mut self, fragment: &str) {
        if let Some(path) = self.path.as_mut() {
            path.push_str(fragment);
        }
    }

    fn on_header_field(&mut self, version: HttpVersion, fragment: &str) {
        if self.proto.have_pending_value {
            // 直前のペアが完成した
            self.flush_pending_header(version.is_http10());
            self.proto.clear_pending_header();
            self.proto.last_name.push_str(fragment);
            self.proto.last_name.make_ascii_lowercase();
        } else {
            // 名前の続き。追加分だけ小文字化する
            let offset = self.proto.last_name.len();
            self.proto.last_name.push_str(fragment);
            self.proto.last_name[offset..].make_ascii_lowercase();
        }
    }

    fn on_header_value(&mut self, fragment: &str) {
        self.proto.last_value.push_str(fragment);
        self.proto.have_pending_value = true;
    }

    fn on_headers_complete(&mut self, info: &HeadersInfo) -> ParseControl {
        if let Some(method_out) = self.method.as_mut() {
            method_out.push_str(method::TABLE[info.method]);
        }
        self.proto.connect_request = info.method == method::CONNECT;

        if info.version.major != 1 {
            self.proto.version_rejected = true;
            return ParseControl::Stop;
        }
        if info.version.minor != 0 {
            self.proto.flags |= HTTP_1_1;
        }

        if !self.proto.last_name.is_empty() {
            self.flush_pending_header(info.version.is_http10());
        }
        self.proto.clear_pending_header();
        self.proto.use_trailers = true;
        self.proto.read_state = ReadState::MessageReady;
        self.proto.flags |= READY;
        self.proto.write_gate = WriteGate::new(WriteState::Empty);

        // RFC 9110 Section 10.1.1: expect が複数あるリクエストは
        // 解釈しない。すべて取り除く
        if self.message.headers().get_all("expect").len() > 1 {
            self.message.headers_mut().remove_all("expect");
        }

        if info.should_keep_alive {
            self.proto.flags |= KEEP_ALIVE;
        }

        ParseControl::Continue
    }

    fn on_body(&mut self, fragment: &[u8], is_final: bool) {
        self.message.body_mut().extend_from_slice(fragment);
        self.proto.flags |= DATA;
        if is_final {
            self.proto.read_state = ReadState::BodyReady;
        }
    }

    fn on_message_complete(&mut self, upgrade: bool) -> ParseControl {
        if !self.proto.last_name.is_empty() {
            let proto = &mut *self.proto;
            let value = proto.last_value.trim_end_matches([' ', '\t']);
            self.message
                .trailers_mut()
                .insert(proto.last_name.as_str(), value);
        }
        self.proto.clear_pending_header();
        self.proto.read_state = ReadState::Empty;
        self.proto.use_trailers = false;
        self.proto.flags |= END;
        if upgrade {
            self.proto.flags |= UPGRADE;
        }

        // パイプラインされた後続メッセージを先読みしないよう停止する
        ParseControl::Stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::BufferedMessage;
    use crate::parser::{ParseStatus, RequestParser};

    struct Exchange {
        proto: ProtoState,
        method: String,
        path: String,
        message: BufferedMessage,
    }

    /// リクエスト全体をパースして到達状態を返す
    fn run(data: &[u8]) -> Exchange {
        let mut exchange = Exchange {
            proto: ProtoState::new(),
            method: String::new(),
            path: String::new(),
            message: BufferedMessage::new(),
        };
        let mut parser = RequestParser::new();
        let mut visitor = Visitor {
            proto: &mut exchange.proto,
            method: Some(&mut exchange.method),
            path: Some(&mut exchange.path),
            message: &mut exchange.message,
        };
        let outcome = parser.execute(&mut visitor, data).unwrap();
        assert_eq!(outcome.consumed, data.len());
        assert_eq!(outcome.status, ParseStatus::Stopped);
        exchange
    }

    #[test]
    fn populates_method_path_headers() {
        let exchange = run(b"GET /x HTTP/1.1\r\nHost: h\r\n\r\n");
        assert_eq!(exchange.method, "GET");
        assert_eq!(exchange.path, "/x");
        assert_eq!(exchange.message.headers.get("host"), Some("h"));
        assert_eq!(exchange.proto.read_state, ReadState::Empty);
        assert!(exchange.proto.has(READY));
        assert!(exchange.proto.has(END));
        assert!(exchange.proto.has(KEEP_ALIVE));
        assert!(exchange.proto.has(HTTP_1_1));
    }

    #[test]
    fn header_names_lowercased_values_right_trimmed() {
        let exchange = run(b"GET / HTTP/1.1\r\nX-MiXeD-CaSe: padded \t\r\n\r\n");
        let pairs: Vec<_> = exchange.message.headers.iter().collect();
        assert_eq!(pairs, vec![("x-mixed-case", "padded")]);
    }

    #[test]
    fn http10_suppresses_expect_and_upgrade() {
        let exchange =
            run(b"POST / HTTP/1.0\r\nExpect: 100-continue\r\nUpgrade: x\r\nHost: h\r\n\r\n");
        assert!(!exchange.message.headers.contains("expect"));
        assert!(!exchange.message.headers.contains("upgrade"));
        assert_eq!(exchange.message.headers.get("host"), Some("h"));
        assert!(!exchange.proto.has(HTTP_1_1));
    }

    #[test]
    fn http11_keeps_expect_and_upgrade() {
        let exchange = run(b"POST / HTTP/1.1\r\nContent-Length: 0\r\nExpect: 100-continue\r\n\r\n");
        assert_eq!(exchange.message.headers.get("expect"), Some("100-continue"));
    }

    #[test]
    fn duplicate_expect_removed() {
        let exchange = run(
            b"POST / HTTP/1.1\r\nExpect: 100-continue\r\nExpect: 100-continue\r\nHost: h\r\n\r\n",
        );
        assert!(!exchange.message.headers.contains("expect"));
        assert_eq!(exchange.message.headers.get("host"), Some("h"));
    }

    #[test]
    fn empty_value_header_does_not_corrupt_next_name() {
        let exchange = run(b"GET / HTTP/1.1\r\nX-Empty:\r\nHost: h\r\n\r\n");
        assert_eq!(exchange.message.headers.get("x-empty"), Some(""));
        assert_eq!(exchange.message.headers.get("host"), Some("h"));
    }

    #[test]
    fn trailers_populate_trailer_map() {
        let exchange = run(
            b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
              2\r\nab\r\n0\r\nX-Checksum: 42\r\n\r\n",
        );
        assert_eq!(exchange.message.body, b"ab");
        assert!(exchange.message.headers.contains("transfer-encoding"));
        assert_eq!(exchange.message.trailers.get("x-checksum"), Some("42"));
        assert!(!exchange.message.headers.contains("x-checksum"));
    }

    #[test]
    fn connect_sets_connect_request() {
        let exchange = run(b"CONNECT h:443 HTTP/1.1\r\nHost: h\r\n\r\n");
        assert!(exchange.proto.connect_request);
        assert!(exchange.proto.has(UPGRADE));
    }

    #[test]
    fn upgrade_flag_from_header() {
        let exchange = run(b"GET /ws HTTP/1.1\r\nUpgrade: websocket\r\n\r\n");
        assert!(exchange.proto.has(UPGRADE));
    }

    #[test]
    fn body_sets_data_flag_and_body_ready() {
        let mut exchange = Exchange {
            proto: ProtoState::new(),
            method: String::new(),
            path: String::new(),
            message: BufferedMessage::new(),
        };
        let mut parser = RequestParser::new();

        // ヘッダーと最終ボディ断片の間で区切って観察する
        let mut visitor = Visitor {
            proto: &mut exchange.proto,
            method: Some(&mut exchange.method),
            path: Some(&mut exchange.path),
            message: &mut exchange.message,
        };
        let head = b"POST / HTTP/1.1\r\nContent-Length: 4\r\n\r\nab";
        parser.execute(&mut visitor, head).unwrap();
        assert_eq!(exchange.proto.read_state, ReadState::MessageReady);
        assert!(exchange.proto.has(DATA));

        let mut visitor = Visitor {
            proto: &mut exchange.proto,
            method: None,
            path: None,
            message: &mut exchange.message,
        };
        parser.execute(&mut visitor, b"cd").unwrap();
        assert_eq!(exchange.message.body, b"abcd");
        assert!(exchange.proto.has(END));
        assert_eq!(exchange.proto.read_state, ReadState::Empty);
    }

    #[test]
    fn version_rejection_sets_flag_and_stops() {
        let mut proto = ProtoState::new();
        let mut method = String::new();
        let mut path = String::new();
        let mut message = BufferedMessage::new();
        let mut parser = RequestParser::new();
        let mut visitor = Visitor {
            proto: &mut proto,
            method: Some(&mut method),
            path: Some(&mut path),
            message: &mut message,
        };
        let outcome = parser
            .execute(&mut visitor, b"GET / HTTP/2.0\r\n\r\n")
            .unwrap();
        assert_eq!(outcome.status, ParseStatus::Stopped);
        assert!(proto.version_rejected);
        // メソッドの転記は拒否判定より前に行われる
        assert_eq!(method, "GET");
        assert_eq!(proto.read_state, ReadState::Empty);
    }

    #[test]
    fn write_gate_reset_on_headers_complete() {
        let mut proto = ProtoState::new();
        proto.write_gate = WriteGate::new(WriteState::Finished);
        let mut message = BufferedMessage::new();
        let mut parser = RequestParser::new();
        let mut visitor = Visitor {
            proto: &mut proto,
            method: None,
            path: None,
            message: &mut message,
        };
        parser
            .execute(&mut visitor, b"GET / HTTP/1.1\r\n\r\n")
            .unwrap();
        assert_eq!(proto.write_gate.state, WriteState::Empty);
    }
}
