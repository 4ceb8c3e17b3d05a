// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! WebSocket transport for the twin link.

use super::connection::{ConnectionError, TwinChannel, TwinConnector};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

const CHANNEL_CAPACITY: usize = 256;

pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl TwinConnector for WebSocketConnector {
    async fn connect(&self) -> Result<TwinChannel, ConnectionError> {
        let (socket, _response) =
            connect_async(self.url.as_str())
                .await
                .map_err(|e| ConnectionError::Connect {
                    url: self.url.clone(),
                    reason: e.to_string(),
                })?;
        debug!(url = %self.url, "WebSocket connected");

        let (mut sink, mut stream) = socket.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(CHANNEL_CAPACITY);

        // writer: ends when the manager drops its sender
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::text(text)).await {
                    warn!(error = %e, "WebSocket write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // reader: ends on close, error, or when the manager stops listening
        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let frame = match message {
                    Ok(Message::Text(text)) => Ok(text.as_str().to_string()),
                    Ok(Message::Close(_)) => Err(ConnectionError::Closed),
                    Ok(_) => continue,
                    Err(e) => Err(ConnectionError::Transport(e.to_string())),
                };
                let terminal = frame.is_err();
                if in_tx.send(frame).await.is_err() || terminal {
                    break;
                }
            }
        });

        Ok(TwinChannel {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
