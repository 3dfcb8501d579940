//! パース状態の定義

/// リクエストパースの進行状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParsePhase {
    /// 次のメッセージ待ち
    Idle,
    /// リクエストライン待ち
    RequestLine,
    /// ヘッダー待ち
    Headers,
    /// ボディ読み取り中 (Content-Length)
    BodyIdentity { remaining: usize },
    /// チャンクサイズ行待ち
    ChunkSize,
    /// チャンクデータ読み取り中
    ChunkData { remaining: usize },
    /// チャンクデータ後の CRLF 待ち
    ChunkDataCrlf,
    /// トレーラー待ち
    Trailers,
    /// メッセージ終端処理
    Done,
}
