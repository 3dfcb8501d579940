//! PBT テスト共通ユーティリティ

use http11_conn::parser::{
    Execute, HeadersInfo, HttpVersion, ParseControl, ParseError, ParseSink, ParseStatus,
    RequestParser,
};
use proptest::prelude::*;

// ========================================
// イベント収集シンク
// ========================================

/// パーサーイベントをそのまま記録するシンク
#[derive(Debug, Default)]
pub struct CollectingSink {
    /// message-begin の回数
    pub begun: usize,
    /// 再構成したリクエストターゲット
    pub url: String,
    /// (名前, 値) ペア (ヘッダーとトレーラーの両方)
    pub pairs: Vec<(String, String)>,
    /// 再構成したボディ
    pub body: Vec<u8>,
    /// headers-complete の付帯情報
    pub info: Option<(usize, HttpVersion, bool)>,
    /// 最終ボディ断片を受けたか
    pub saw_final_body: bool,
    /// message-complete の回数
    pub completed: usize,
}

impl ParseSink for CollectingSink {
    fn on_message_begin(&mut self) {
        self.begun += 1;
    }

    fn on_url(&mut self, fragment: &str) {
        self.url.push_str(fragment);
    }

    fn on_header_field(&mut self, _version: HttpVersion, fragment: &str) {
        self.pairs.push((fragment.to_string(), String::new()));
    }

    fn on_header_value(&mut self, fragment: &str) {
        if let Some((_, value)) = self.pairs.last_mut() {
            value.push_str(fragment);
        }
    }

    fn on_headers_complete(&mut self, info: &HeadersInfo) -> ParseControl {
        self.info = Some((info.method, info.version, info.should_keep_alive));
        ParseControl::Continue
    }

    fn on_body(&mut self, fragment: &[u8], is_final: bool) {
        self.body.extend_from_slice(fragment);
        if is_final {
            self.saw_final_body = true;
        }
    }

    fn on_message_complete(&mut self, _upgrade: bool) -> ParseControl {
        self.completed += 1;
        ParseControl::Stop
    }
}

/// 任意の位置で分割しながらパーサーを駆動する
///
/// 接続エンジンと同じ方式でバッファを管理する: 未消費バイトを保持し、
/// 分割片を追記しては実行する。
pub fn run_split(
    data: &[u8],
    mut splits: Vec<usize>,
) -> Result<(CollectingSink, Execute), ParseError> {
    let mut parser = RequestParser::new();
    let mut sink = CollectingSink::default();
    let mut buf: Vec<u8> = Vec::new();
    let mut offset = 0;

    splits.sort_unstable();
    splits.dedup();
    splits.retain(|s| *s > 0 && *s < data.len());
    splits.push(data.len());

    let mut last = Execute {
        consumed: 0,
        status: ParseStatus::NeedMore,
    };
    for split in splits {
        buf.extend_from_slice(&data[offset..split]);
        offset = split;

        last = parser.execute(&mut sink, &buf)?;
        assert!(last.consumed <= buf.len());
        buf.drain(..last.consumed);
        if last.status == ParseStatus::Stopped {
            break;
        }
    }
    Ok((sink, last))
}

// ========================================
// Strategy 定義
// ========================================

/// ヘッダー名に使えるトークン文字
pub fn token_char() -> impl Strategy<Value = char> {
    prop_oneof![
        prop::char::range('a', 'z'),
        prop::char::range('A', 'Z'),
        prop::char::range('0', '9'),
        Just('-'),
        Just('_'),
        Just('.'),
    ]
}

/// トークン文字列 (1 文字以上)
pub fn token_string(max_len: usize) -> impl Strategy<Value = String> {
    proptest::collection::vec(token_char(), 1..=max_len)
        .prop_map(|chars| chars.into_iter().collect())
}

/// フレーミングや接続制御と衝突しないヘッダー名
pub fn benign_header_name() -> impl Strategy<Value = String> {
    token_string(24).prop_map(|s| format!("x-{}", s))
}

/// ヘッダー値 (CR/LF と前後空白なし)
pub fn header_value() -> impl Strategy<Value = String> {
    "[!-~][ -~]{0,48}".prop_map(|s| s.trim().to_string())
}

/// メソッドテーブルの添字
pub fn method_index() -> impl Strategy<Value = usize> {
    0..http11_conn::method::TABLE.len()
}

/// リクエストターゲット
pub fn request_target() -> impl Strategy<Value = String> {
    prop_oneof![Just("/".to_string()), "/[a-zA-Z0-9/_.-]{1,48}".prop_map(|s| s)]
}

/// ボディ
pub fn body() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), 0..256)
}

/// 分割位置の集合
pub fn splits(max: usize) -> impl Strategy<Value = Vec<usize>> {
    proptest::collection::vec(0..max.max(1), 0..6)
}
