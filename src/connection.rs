//! HTTP/1.x サーバー接続
//!
//! 任意の非同期バイトストリームの上で、1 リクエスト / 1 レスポンスの
//! 交換を順に処理する接続エンジン。受信バイトをインクリメンタルに
//! パースしてメッセージへ反映し、フレーミングを確定したレスポンスを
//! 送信する。keep-alive の判定に従い、レスポンス完了時に
//! トランスポートを閉じる。
//!
//! ## 読み取りの流れ
//!
//! 読み取り操作は到達マイルストーンが異なるだけで同じ駆動ループを
//! 共有する:
//!
//! | 操作 | 前提状態 | 完了条件 |
//! |------|----------|----------|
//! | [`read_request`](Connection::read_request) | `Empty` | ヘッダー受信 |
//! | [`read_some`](Connection::read_some) | `MessageReady` | ボディ断片受信 |
//! | [`read_trailers`](Connection::read_trailers) | `BodyReady` | メッセージ終端 |
//!
//! ## 使い方
//!
//! ```ignore
//! use http11_conn::{BufferedMessage, Connection, ReadState};
//!
//! let mut conn = Connection::new(stream, 8192)?;
//! conn.open();
//!
//! while conn.is_open() {
//!     let (mut method, mut path) = (String::new(), String::new());
//!     let mut request = BufferedMessage::new();
//!     conn.read_request(&mut method, &mut path, &mut request).await?;
//!     while conn.read_state() == ReadState::MessageReady {
//!         conn.read_some(&mut request).await?;
//!     }
//!     if conn.read_state() == ReadState::BodyReady {
//!         conn.read_trailers(&mut request).await?;
//!     }
//!
//!     let mut response = BufferedMessage::new();
//!     response.body.extend_from_slice(b"hello");
//!     conn.write_response(200, "OK", &response).await?;
//! }
//! ```

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::message::Message;
use crate::parser::{ParseError, ParseStatus, RequestParser};
use crate::serialize;
use crate::state::{ReadState, WriteGate, WriteState};
use crate::visitor::{
    clear_message, ProtoState, Visitor, DATA, END, HTTP_1_1, KEEP_ALIVE, READY, UPGRADE,
};

/// HTTP/1.x サーバー接続
///
/// `T` は信頼性のある順序保証付きバイトストリームであること。
/// 同時に実行できる操作は 1 つで、`&mut self` がそれを強制する。
pub struct Connection<T> {
    transport: T,
    /// パーサーのスライディングウィンドウ。容量は固定
    buf: Box<[u8]>,
    /// `buf` 先頭の有効バイト数
    used: usize,
    parser: RequestParser,
    proto: ProtoState,
    /// レスポンス 1 フェーズ分の組み立て先。レスポンスを並行して
    /// 生成しないため接続内で使い回せる
    write_buf: Vec<u8>,
    open: bool,
}

impl<T> Connection<T> {
    /// 接続を作成する
    ///
    /// `capacity` は受信バッファの容量。リクエストのヘッダーブロックが
    /// 収まらないと読み取りは
    /// [`BufferExhausted`](Error::BufferExhausted) で失敗する。
    /// 0 を渡すと [`EmptyBuffer`](Error::EmptyBuffer) を返す。
    pub fn new(transport: T, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::EmptyBuffer);
        }
        Ok(Self {
            transport,
            buf: vec![0u8; capacity].into_boxed_slice(),
            used: 0,
            parser: RequestParser::new(),
            proto: ProtoState::new(),
            write_buf: Vec::new(),
            open: false,
        })
    }

    /// 接続を有効にする
    ///
    /// トランスポートの受け入れ (または前段のハンドシェイク) が
    /// 済んだ後に呼ぶ。
    pub fn open(&mut self) {
        self.open = true;
    }

    /// 接続が開いているか
    ///
    /// keep-alive でないレスポンスの送信完了後は false になる。
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// 読み取り側の状態
    pub fn read_state(&self) -> ReadState {
        self.proto.read_state
    }

    /// 書き込み側の状態
    pub fn write_state(&self) -> WriteState {
        self.proto.write_gate.state
    }

    /// チャンクストリーミングを使えるか (HTTP/1.1 リクエストのみ)
    pub fn write_response_native_stream(&self) -> bool {
        self.proto.has(HTTP_1_1)
    }

    /// 直近のリクエストがプロトコル切り替えを要求したか
    pub fn upgrade_requested(&self) -> bool {
        self.proto.has(UPGRADE)
    }

    /// 下層のトランスポートへの参照
    pub fn next_layer(&self) -> &T {
        &self.transport
    }

    /// 下層のトランスポートへの可変参照
    pub fn next_layer_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// 接続を分解してトランスポートを取り出す
    pub fn into_inner(self) -> T {
        self.transport
    }

    /// 読み取り側を初期状態に戻す
    ///
    /// トランスポートエラーと致命的なパースエラーの後処理。
    fn clear_buffer(&mut self) {
        self.proto.read_state = ReadState::Empty;
        self.proto.write_gate = WriteGate::new(WriteState::Empty);
        self.proto.clear_pending_header();
        self.proto.version_rejected = false;
        self.used = 0;
        self.parser.reset();
    }

    /// 到達マイルストーンを判定し、達していればフラグを消費する
    fn milestone_reached(&mut self, target: u8) -> bool {
        if target == READY && self.proto.has(READY) {
            self.proto.flags &= !READY;
            true
        } else if target == DATA && self.proto.flags & (DATA | END) != 0 {
            self.proto.flags &= !(READY | DATA);
            true
        } else if target == END && self.proto.has(END) {
            self.proto.flags &= !(READY | DATA | END);
            true
        } else {
            false
        }
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> Connection<T> {
    /// リクエストヘッダーを読み取る
    ///
    /// `method` と `path` は消去してから書き込む。完了時点で
    /// メッセージにはヘッダーが入っており、ボディが既に届いていれば
    /// それも反映されている。[`read_state`](Connection::read_state) が
    /// [`ReadState::Empty`] ならメッセージはトレーラーまで完結している。
    pub async fn read_request<M: Message>(
        &mut self,
        method: &mut String,
        path: &mut String,
        message: &mut M,
    ) -> Result<()> {
        if self.proto.read_state != ReadState::Empty {
            return Err(Error::OutOfOrder);
        }

        method.clear();
        path.clear();
        // ヘッダー完了まで書き込みを禁止する。パーサーが
        // headers-complete で Empty に戻す
        self.proto.write_gate = WriteGate::new(WriteState::Finished);

        self.drive(READY, Some(method), Some(path), message).await?;
        debug!(method = %method.as_str(), path = %path.as_str(), "request head received");
        Ok(())
    }

    /// ボディデータを読み取る
    ///
    /// ボディ断片がメッセージへ追記されるたびに完了する。最終断片を
    /// 受けると [`read_state`](Connection::read_state) は
    /// [`ReadState::BodyReady`] へ、メッセージ終端まで進んだ場合は
    /// [`ReadState::Empty`] へ遷移する。
    pub async fn read_some<M: Message>(&mut self, message: &mut M) -> Result<()> {
        if self.proto.read_state != ReadState::MessageReady {
            return Err(Error::OutOfOrder);
        }
        self.drive(DATA, None, None, message).await
    }

    /// トレーラーを読み取る
    ///
    /// メッセージ終端まで駆動する。完了時点でトレーラーは
    /// メッセージに反映済み。
    pub async fn read_trailers<M: Message>(&mut self, message: &mut M) -> Result<()> {
        if self.proto.read_state != ReadState::BodyReady {
            return Err(Error::OutOfOrder);
        }
        self.drive(END, None, None, message).await
    }

    /// 読み取り駆動ループ
    ///
    /// バッファ済みバイトを先にパースし、足りなければトランスポート
    /// から読み足す。`target` のマイルストーンに達したら戻る。
    async fn drive<M: Message>(
        &mut self,
        target: u8,
        mut method: Option<&mut String>,
        mut path: Option<&mut String>,
        message: &mut M,
    ) -> Result<()> {
        if self.used == 0 {
            self.fill().await?;
        }

        loop {
            let outcome = {
                let mut visitor = Visitor {
                    proto: &mut self.proto,
                    method: method.as_mut().map(|m| &mut **m),
                    path: path.as_mut().map(|p| &mut **p),
                    message,
                };
                self.parser.execute(&mut visitor, &self.buf[..self.used])
            };

            let exec = match outcome {
                Ok(exec) => exec,
                Err(e) => {
                    self.clear_buffer();
                    return Err(Error::Parsing(e));
                }
            };

            if self.proto.version_rejected {
                // HTTP/1.x 以外は既定の 505 を返して打ち切る。
                // 書き込み結果にかかわらずパースエラーとして報告する
                self.clear_buffer();
                clear_message(message);
                debug!("unsupported HTTP major version, replying 505");
                let _ = self
                    .transport
                    .write_all(serialize::VERSION_NOT_SUPPORTED_RESPONSE)
                    .await;
                return Err(Error::Parsing(ParseError::InvalidVersion(
                    "unsupported major version".to_string(),
                )));
            }

            if exec.status == ParseStatus::Stopped {
                // message-complete での意図的な停止。パイプラインされた
                // バイトを先読みしないための挙動で、エラーではない
                self.parser.reset();
            }

            self.buf.copy_within(exec.consumed..self.used, 0);
            self.used -= exec.consumed;

            if self.milestone_reached(target) {
                return Ok(());
            }

            if self.used == self.buf.len() {
                return Err(Error::BufferExhausted);
            }

            self.fill().await?;
        }
    }

    /// トランスポートから 1 回読み込む
    ///
    /// EOF とエラーは読み取り側のリセットを伴う。
    async fn fill(&mut self) -> Result<()> {
        match self.transport.read(&mut self.buf[self.used..]).await {
            Ok(0) => {
                self.clear_buffer();
                Err(Error::ConnectionClosed)
            }
            Ok(n) => {
                trace!(bytes = n, "transport read");
                self.used += n;
                Ok(())
            }
            Err(e) => {
                self.clear_buffer();
                Err(Error::Io(e))
            }
        }
    }

    /// 完結したレスポンスを書き込む
    ///
    /// メッセージのヘッダーとボディから Content-Length フレーミングの
    /// レスポンスを構成する。`connection: close` は keep-alive を
    /// 使わない場合に自動付与し、`content-length` はボディを持てる
    /// ステータスでメッセージ側に指定がないときに自動付与する。
    /// 送信後、keep-alive でなければトランスポートを閉じる。
    pub async fn write_response<M: Message>(
        &mut self,
        status_code: u16,
        reason_phrase: &str,
        message: &M,
    ) -> Result<()> {
        if !self.proto.write_gate.write_message() {
            return Err(Error::OutOfOrder);
        }

        let headers = message.headers();
        let has_close = serialize::has_connection_close(headers);
        if has_close {
            self.proto.flags &= !KEEP_ALIVE;
        }
        let synthesize_close = !self.proto.has(KEEP_ALIVE) && !has_close;
        let implicit = serialize::implicit_content_length(
            headers,
            status_code,
            self.proto.connect_request,
        );

        self.write_buf.clear();
        serialize::encode_status_line(
            &mut self.write_buf,
            self.proto.has(HTTP_1_1),
            status_code,
            reason_phrase,
        );
        if synthesize_close {
            self.write_buf.extend_from_slice(b"connection: close\r\n");
        }
        serialize::encode_header_block(&mut self.write_buf, headers);
        if !implicit {
            self.write_buf.extend_from_slice(b"content-length: ");
            self.write_buf
                .extend_from_slice(message.body().len().to_string().as_bytes());
            self.write_buf.extend_from_slice(b"\r\n");
        }
        self.write_buf.extend_from_slice(b"\r\n");
        if !implicit {
            self.write_buf.extend_from_slice(message.body());
        }

        debug!(status = status_code, "writing response");
        self.finish_response_write().await
    }

    /// 100 Continue を書き込む
    ///
    /// `Expect: 100-continue` 付きリクエストへの中間応答。接続状態には
    /// 影響しない。
    pub async fn write_response_continue(&mut self) -> Result<()> {
        if !self.proto.write_gate.write_continue() {
            return Err(Error::OutOfOrder);
        }
        self.transport
            .write_all(serialize::CONTINUE_RESPONSE)
            .await?;
        Ok(())
    }

    /// メタデータのみのレスポンスを書き込み、チャンクストリーミングを
    /// 開始する
    ///
    /// HTTP/1.1 リクエストでのみ使用できる。HTTP/1.0 では書き込み状態を
    /// 元に戻して
    /// [`NativeStreamUnsupported`](Error::NativeStreamUnsupported) を
    /// 返す。`transfer-encoding: chunked` を常に付与する。
    pub async fn write_response_metadata<M: Message>(
        &mut self,
        status_code: u16,
        reason_phrase: &str,
        message: &M,
    ) -> Result<()> {
        let previous = self.proto.write_gate;
        if !self.proto.write_gate.write_metadata() {
            return Err(Error::OutOfOrder);
        }
        if !self.proto.has(HTTP_1_1) {
            self.proto.write_gate = previous;
            return Err(Error::NativeStreamUnsupported);
        }

        let headers = message.headers();
        let has_close = serialize::has_connection_close(headers);
        if has_close {
            self.proto.flags &= !KEEP_ALIVE;
        }
        let synthesize_close = !self.proto.has(KEEP_ALIVE) && !has_close;

        self.write_buf.clear();
        serialize::encode_status_line(&mut self.write_buf, true, status_code, reason_phrase);
        if synthesize_close {
            self.write_buf.extend_from_slice(b"connection: close\r\n");
        }
        serialize::encode_header_block(&mut self.write_buf, headers);
        self.write_buf
            .extend_from_slice(b"transfer-encoding: chunked\r\n\r\n");

        self.transport.write_all(&self.write_buf).await?;
        Ok(())
    }

    /// ボディチャンクを 1 つ書き込む
    ///
    /// メッセージのボディが空なら何も送らずに成功する。
    pub async fn write_chunk<M: Message>(&mut self, message: &M) -> Result<()> {
        if !self.proto.write_gate.write_chunk() {
            return Err(Error::OutOfOrder);
        }
        if message.body().is_empty() {
            return Ok(());
        }

        self.write_buf.clear();
        serialize::encode_chunk_frame(&mut self.write_buf, message.body());
        self.transport.write_all(&self.write_buf).await?;
        Ok(())
    }

    /// 終端チャンクとトレーラーを書き込み、レスポンスを完了する
    pub async fn write_trailers<M: Message>(&mut self, message: &M) -> Result<()> {
        if !self.proto.write_gate.write_trailers() {
            return Err(Error::OutOfOrder);
        }

        self.write_buf.clear();
        self.write_buf.extend_from_slice(b"0\r\n");
        serialize::encode_header_block(&mut self.write_buf, message.trailers());
        self.write_buf.extend_from_slice(b"\r\n");

        self.finish_response_write().await
    }

    /// 終端チャンクを書き込み、レスポンスを完了する
    pub async fn write_end_of_message(&mut self) -> Result<()> {
        if !self.proto.write_gate.end() {
            return Err(Error::OutOfOrder);
        }

        self.write_buf.clear();
        self.write_buf.extend_from_slice(serialize::LAST_CHUNK);

        self.finish_response_write().await
    }

    /// レスポンス完了時の keep-alive 処理
    ///
    /// 書き込みの成否によらず接続状態を更新し、keep-alive でなければ
    /// トランスポートを閉じてから結果を返す。
    async fn finish_response_write(&mut self) -> Result<()> {
        let result = self.transport.write_all(&self.write_buf).await;

        self.open = self.proto.has(KEEP_ALIVE);
        if !self.open {
            debug!("closing transport after response");
            let _ = self.transport.shutdown().await;
        }

        result?;
        Ok(())
    }
}

impl<T> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("read_state", &self.proto.read_state)
            .field("write_state", &self.proto.write_gate.state)
            .field("open", &self.open)
            .field("buffered", &self.used)
            .finish_non_exhaustive()
    }
}
