//! Drive both facades against the in-process transport.
//!
//! Run with `RUST_LOG=wsengine=debug` to see the engine's state transitions.

use std::time::Duration;

use wsengine::{
    Config, MemoryTransport, SocketEvent, StreamOptions, WebSocket, WebSocketStream,
};

#[tokio::main]
async fn main() -> wsengine::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Event-dispatch facade
    let (transport, peer) = MemoryTransport::pair();
    let ws = WebSocket::with_config(
        "ws://localhost/chat",
        ["chat"],
        transport,
        Config::socket().with_idle_timeout(Duration::from_secs(30)),
        Box::new(|event| match event {
            SocketEvent::Open => println!("[socket] open"),
            SocketEvent::Message(data) => println!("[socket] message: {data:?}"),
            SocketEvent::Error(error) => println!("[socket] error: {error}"),
            SocketEvent::Close(close) => println!(
                "[socket] close: {} {:?} clean={}",
                close.code, close.reason, close.was_clean
            ),
        }),
    )?;

    peer.send_text("welcome");
    tokio::time::sleep(Duration::from_millis(10)).await;
    ws.send("hi there")?;
    println!("[socket] buffered_amount = {}", ws.buffered_amount());
    ws.close(Some(1000), Some("bye"))?;
    ws.closed().await;
    println!("[socket] transport saw: {:?}", peer.calls());

    // Stream facade
    let (transport, peer) = MemoryTransport::pair();
    let ws = WebSocketStream::connect(
        "ws://localhost/feed",
        StreamOptions::new().header("Authorization", "Bearer demo"),
        transport,
    )?;
    let mut opened = ws.opened().await?;
    for n in 0..3 {
        peer.send_text(format!("tick {n}"));
    }
    peer.close(Some(1000), "feed finished");

    while let Some(message) = opened.readable.read().await {
        println!("[stream] {message:?}");
    }
    let info = ws.closed().await?;
    println!("[stream] closed: {} {:?}", info.code, info.reason);

    Ok(())
}
