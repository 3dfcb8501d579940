//! エコーサーバーの例
//!
//! 受け取ったリクエストのボディをそのまま返す。ボディが空の場合は
//! メソッドとパスを返す。`/stream` へのリクエストにはチャンク転送で
//! 応答する。
//!
//! 使い方:
//!   cargo run -p http11-echo-server
//!   cargo run -p http11-echo-server -- 8081

use http11_conn::{BufferedMessage, Connection, Error, ReadState};
use tokio::net::{TcpListener, TcpStream};

const READ_BUFFER_SIZE: usize = 8192;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let port: u16 = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => 8080,
    };
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("listening on http://{}", addr);

    tokio::select! {
        result = accept_loop(listener) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            Ok(())
        }
    }
}

async fn accept_loop(listener: TcpListener) -> anyhow::Result<()> {
    loop {
        let (stream, peer_addr) = listener.accept().await?;
        tokio::spawn(async move {
            if let Err(e) = handle_client(stream).await {
                tracing::warn!(%peer_addr, error = %e, "client error");
            }
        });
    }
}

async fn handle_client(stream: TcpStream) -> anyhow::Result<()> {
    let mut conn = Connection::new(stream, READ_BUFFER_SIZE)?;
    conn.open();

    while conn.is_open() {
        let (mut method, mut path) = (String::new(), String::new());
        let mut request = BufferedMessage::new();

        match conn.read_request(&mut method, &mut path, &mut request).await {
            Ok(()) => {}
            // keep-alive 待機中の切断は正常終了
            Err(Error::ConnectionClosed) => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        let expects_continue = request
            .headers
            .get("expect")
            .is_some_and(|v| v.eq_ignore_ascii_case("100-continue"));
        if expects_continue {
            conn.write_response_continue().await?;
        }

        while conn.read_state() == ReadState::MessageReady {
            conn.read_some(&mut request).await?;
        }
        if conn.read_state() == ReadState::BodyReady {
            conn.read_trailers(&mut request).await?;
        }

        tracing::info!(%method, %path, body_len = request.body.len(), "request");

        if path == "/stream" && conn.write_response_native_stream() {
            let mut head = BufferedMessage::new();
            head.headers.insert("content-type", "text/plain");
            conn.write_response_metadata(200, "OK", &head).await?;

            let mut chunk = BufferedMessage::new();
            for piece in [&b"streamed "[..], b"response ", b"body\n"] {
                chunk.body.clear();
                chunk.body.extend_from_slice(piece);
                conn.write_chunk(&chunk).await?;
            }
            conn.write_end_of_message().await?;
        } else {
            let mut response = BufferedMessage::new();
            response.headers.insert("content-type", "text/plain");
            if request.body.is_empty() {
                response
                    .body
                    .extend_from_slice(format!("{} {}\n", method, path).as_bytes());
            } else {
                response.body.extend_from_slice(&request.body);
            }
            conn.write_response(200, "OK", &response).await?;
        }
    }

    Ok(())
}
