//! Echo server and client on localhost.
//!
//! Run with `cargo run --example echo`.

use bytes::Bytes;
use riptide_peer::{Client, ClientConfig, ClientEvent, Server, ServerConfig, ServerEvent};
use riptide_wire::Reliability;
use std::sync::Arc;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let (server_tx, mut server_rx) = mpsc::unbounded_channel();
    let server = Arc::new(
        Server::bind(ServerConfig::default(), "127.0.0.1:0".parse()?, server_tx).await?,
    );
    let addr = server.local_addr()?;

    // echo every application message back to its sender
    {
        let server = server.clone();
        tokio::spawn(async move { server.run().await });
    }
    {
        let server = server.clone();
        tokio::spawn(async move {
            while let Some(event) = server_rx.recv().await {
                if let ServerEvent::Message {
                    peer,
                    payload,
                    reliability,
                    channel,
                } = event
                {
                    println!("server: echoing {} bytes to {}", payload.len(), peer);
                    if let Err(e) = server.send(peer, reliability, channel, payload) {
                        eprintln!("server: echo failed: {}", e);
                    }
                }
            }
        });
    }

    let (client_tx, mut client_rx) = mpsc::unbounded_channel();
    let client = Arc::new(Client::connect(ClientConfig::default(), addr, client_tx).await?);
    {
        let client = client.clone();
        tokio::spawn(async move { client.run().await });
    }

    for line in ["hello", "riptide", "over unreliable datagrams"] {
        client.send(Reliability::ReliableOrdered, 0, Bytes::from(line))?;
    }

    let mut echoed = 0;
    while let Some(event) = client_rx.recv().await {
        if let ClientEvent::Message { payload, .. } = event {
            println!("client: got back {:?}", String::from_utf8_lossy(&payload));
            echoed += 1;
            if echoed == 3 {
                break;
            }
        }
    }

    client.disconnect("done");
    Ok(())
}
