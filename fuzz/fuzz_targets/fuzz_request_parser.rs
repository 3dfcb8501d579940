#![no_main]

use http11_conn::parser::{HeadersInfo, HttpVersion, ParseControl, ParseSink, RequestParser};
use libfuzzer_sys::fuzz_target;

/// イベントを読み捨てるシンク
struct NullSink;

impl ParseSink for NullSink {
    fn on_message_begin(&mut self) {}
    fn on_url(&mut self, _fragment: &str) {}
    fn on_header_field(&mut self, _version: HttpVersion, _fragment: &str) {}
    fn on_header_value(&mut self, _fragment: &str) {}
    fn on_headers_complete(&mut self, _info: &HeadersInfo) -> ParseControl {
        ParseControl::Continue
    }
    fn on_body(&mut self, _fragment: &[u8], _is_final: bool) {}
    fn on_message_complete(&mut self, _upgrade: bool) -> ParseControl {
        ParseControl::Stop
    }
}

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    // 先頭バイトを分割位置として使い、残りを 2 回に分けて与える
    let payload = &data[1..];
    let split = (data[0] as usize) % (payload.len() + 1);

    let mut parser = RequestParser::new();
    let mut sink = NullSink;
    let mut buf = payload[..split].to_vec();

    match parser.execute(&mut sink, &buf) {
        Ok(outcome) => {
            assert!(outcome.consumed <= buf.len());
            buf.drain(..outcome.consumed);
        }
        Err(_) => return,
    }

    buf.extend_from_slice(&payload[split..]);
    if let Ok(outcome) = parser.execute(&mut sink, &buf) {
        assert!(outcome.consumed <= buf.len());
    }
});
