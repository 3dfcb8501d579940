//! 読み書き状態機械
//!
//! 接続は読み取り側と書き込み側で独立した状態を持つ。読み取り状態は
//! パーサーのマイルストーンに従って遷移し、書き込み状態はレスポンス
//! 出力操作の合法な順序を強制する。

/// 読み取り側の状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    /// リクエスト待ち (ヘッダー未到達)
    Empty,
    /// ヘッダー受信済み、ボディ読み取り可能
    MessageReady,
    /// ボディ受信完了、トレーラー読み取り可能
    BodyReady,
}

/// 書き込み側の状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    /// レスポンス未開始
    Empty,
    /// 100 Continue 送信済み
    ContinueIssued,
    /// メタデータ送信済み (チャンクストリーミング中)
    MetadataIssued,
    /// 完結レスポンス送信済み
    MessageIssued,
    /// チャンクボディ送信中
    ChunkedBody,
    /// トレーラー送信済み
    TrailersIssued,
    /// レスポンス完了
    Finished,
}

/// 書き込み操作の順序を強制するゲート
///
/// 各メソッドは遷移が合法なら状態を進めて true を返す。不正な遷移では
/// 状態を変えずに false を返す。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WriteGate {
    pub state: WriteState,
}

impl WriteGate {
    pub fn new(state: WriteState) -> Self {
        Self { state }
    }

    /// 完結レスポンス (ステータス + ヘッダー + ボディ)
    pub fn write_message(&mut self) -> bool {
        match self.state {
            WriteState::Empty | WriteState::ContinueIssued => {
                self.state = WriteState::MessageIssued;
                true
            }
            _ => false,
        }
    }

    /// 100 Continue
    pub fn write_continue(&mut self) -> bool {
        match self.state {
            WriteState::Empty => {
                self.state = WriteState::ContinueIssued;
                true
            }
            _ => false,
        }
    }

    /// メタデータのみ (チャンクストリーミング開始)
    pub fn write_metadata(&mut self) -> bool {
        match self.state {
            WriteState::Empty | WriteState::ContinueIssued => {
                self.state = WriteState::MetadataIssued;
                true
            }
            _ => false,
        }
    }

    /// ボディチャンク
    pub fn write_chunk(&mut self) -> bool {
        match self.state {
            WriteState::MetadataIssued | WriteState::ChunkedBody => {
                self.state = WriteState::ChunkedBody;
                true
            }
            _ => false,
        }
    }

    /// トレーラー (終端チャンク込み)
    pub fn write_trailers(&mut self) -> bool {
        match self.state {
            WriteState::MetadataIssued | WriteState::ChunkedBody => {
                self.state = WriteState::TrailersIssued;
                true
            }
            _ => false,
        }
    }

    /// 終端チャンクのみ
    pub fn end(&mut self) -> bool {
        match self.state {
            WriteState::MetadataIssued | WriteState::ChunkedBody => {
                self.state = WriteState::Finished;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(state: WriteState) -> WriteGate {
        WriteGate::new(state)
    }

    #[test]
    fn from_empty() {
        assert!(gate(WriteState::Empty).write_message());
        assert!(gate(WriteState::Empty).write_continue());
        assert!(gate(WriteState::Empty).write_metadata());
        assert!(!gate(WriteState::Empty).write_chunk());
        assert!(!gate(WriteState::Empty).write_trailers());
        assert!(!gate(WriteState::Empty).end());
    }

    #[test]
    fn from_continue_issued() {
        assert!(gate(WriteState::ContinueIssued).write_message());
        assert!(!gate(WriteState::ContinueIssued).write_continue());
        assert!(gate(WriteState::ContinueIssued).write_metadata());
        assert!(!gate(WriteState::ContinueIssued).write_chunk());
        assert!(!gate(WriteState::ContinueIssued).write_trailers());
        assert!(!gate(WriteState::ContinueIssued).end());
    }

    #[test]
    fn from_metadata_issued() {
        assert!(!gate(WriteState::MetadataIssued).write_message());
        assert!(!gate(WriteState::MetadataIssued).write_continue());
        assert!(!gate(WriteState::MetadataIssued).write_metadata());
        assert!(gate(WriteState::MetadataIssued).write_chunk());
        assert!(gate(WriteState::MetadataIssued).write_trailers());
        assert!(gate(WriteState::MetadataIssued).end());
    }

    #[test]
    fn from_chunked_body() {
        assert!(!gate(WriteState::ChunkedBody).write_message());
        assert!(!gate(WriteState::ChunkedBody).write_continue());
        assert!(!gate(WriteState::ChunkedBody).write_metadata());
        assert!(gate(WriteState::ChunkedBody).write_chunk());
        assert!(gate(WriteState::ChunkedBody).write_trailers());
        assert!(gate(WriteState::ChunkedBody).end());
    }

    #[test]
    fn terminal_states_reject_everything() {
        for state in [
            WriteState::MessageIssued,
            WriteState::TrailersIssued,
            WriteState::Finished,
        ] {
            assert!(!gate(state).write_message());
            assert!(!gate(state).write_continue());
            assert!(!gate(state).write_metadata());
            assert!(!gate(state).write_chunk());
            assert!(!gate(state).write_trailers());
            assert!(!gate(state).end());
        }
    }

    #[test]
    fn rejected_transition_keeps_state() {
        let mut g = gate(WriteState::MessageIssued);
        assert!(!g.write_chunk());
        assert_eq!(g.state, WriteState::MessageIssued);
    }

    #[test]
    fn streaming_sequence() {
        let mut g = gate(WriteState::Empty);
        assert!(g.write_metadata());
        assert!(g.write_chunk());
        assert!(g.write_chunk());
        assert!(g.write_trailers());
        assert_eq!(g.state, WriteState::TrailersIssued);
    }
}
