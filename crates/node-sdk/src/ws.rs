//! WebSocket implementation of the data channel.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tn_domain::error::{Error, Result};
use tn_protocol::TopicData;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::codec::FrameCodec;
use crate::transport::{DataChannel, InboundSender};

const OUTBOUND_CAPACITY: usize = 256;

/// One topic data stream.  A reader task decodes inbound frames and hands
/// them to the dispatcher; a writer task drains the outbound queue.  When
/// either side ends, both stop and [`closed`](DataChannel::closed) fires.
pub struct WsDataChannel {
    outbound: mpsc::Sender<Message>,
    codec: Arc<dyn FrameCodec>,
    closed: CancellationToken,
}

impl WsDataChannel {
    pub async fn connect(
        url: &str,
        codec: Arc<dyn FrameCodec>,
        inbound: InboundSender,
    ) -> Result<Self> {
        tracing::info!(url = %url, "opening topic data channel");

        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| Error::Transport(format!("data channel {url}: {e}")))?;
        let (mut sink, mut stream) = ws.split();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_CAPACITY);
        let closed = CancellationToken::new();

        // Writer task: sends outbound frames to the WebSocket.
        let writer_closed = closed.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = outbound_rx.recv() => match msg {
                        Some(msg) => {
                            if let Err(e) = sink.send(msg).await {
                                tracing::warn!(error = %e, "data channel send failed");
                                break;
                            }
                        }
                        None => break,
                    },
                    _ = writer_closed.cancelled() => break,
                }
            }
            let _ = sink.close().await;
            writer_closed.cancel();
        });

        // Reader task: decode inbound frames and forward them.
        let reader_closed = closed.clone();
        let reader_codec = codec.clone();
        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    next = stream.next() => next,
                    _ = reader_closed.cancelled() => break,
                };
                let bytes = match next {
                    Some(Ok(Message::Binary(bytes))) => bytes,
                    Some(Ok(Message::Text(text))) => text.into_bytes(),
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("master node closed the data channel");
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "data channel read failed");
                        break;
                    }
                };

                match reader_codec.decode(&bytes) {
                    Ok(frame) => {
                        if inbound.send(frame).is_err() {
                            tracing::debug!("dispatcher gone, stopping reader");
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, bytes = bytes.len(), "failed to decode frame");
                    }
                }
            }
            reader_closed.cancel();
        });

        Ok(Self {
            outbound: outbound_tx,
            codec,
            closed,
        })
    }
}

#[async_trait]
impl DataChannel for WsDataChannel {
    async fn send(&self, frame: &TopicData) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(Error::Transport("data channel closed".into()));
        }
        let bytes = self.codec.encode(frame)?;
        self.outbound
            .send(Message::Binary(bytes))
            .await
            .map_err(|_| Error::Transport("data channel closed".into()))
    }

    fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    async fn close(&self) {
        self.closed.cancel();
    }
}

impl Drop for WsDataChannel {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}
