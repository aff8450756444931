// WebSocket connector
//
// Opens a tokio-tungstenite socket and splits it into a writer task (draining
// outbound text frames) and a reader task (forwarding frames and closures as
// `SocketEvent`s). Both tasks stop when the connection's cancellation token
// fires.

use super::{CloseInfo, Connection, SocketConnector, SocketEvent, CLOSE_NO_STATUS};
use crate::types::{LoaderError, LoaderResult, RawMessage};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Default, Clone)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SocketConnector for WebSocketConnector {
    async fn open(&self, url: &str) -> LoaderResult<Connection> {
        info!("Connecting to WebSocket: {}", url);

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| LoaderError::Connection(format!("Connection failed: {}", e)))?;

        let (write, read) = ws_stream.split();
        let (connection, outbound_rx, inbound_tx) = Connection::pair();

        tokio::spawn(write_task(write, outbound_rx, connection.cancel.clone()));
        tokio::spawn(read_task(read, inbound_tx, connection.cancel.clone()));

        info!("WebSocket connected successfully");
        Ok(connection)
    }
}

/// WebSocket write task
async fn write_task(
    mut write: SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            msg = rx.recv() => {
                let Some(json) = msg else { break };
                if let Err(e) = write.send(Message::Text(json.into())).await {
                    error!("Failed to send WebSocket message: {}", e);
                    break;
                }
            }
        }
    }

    debug!("WebSocket write task ended");
}

/// WebSocket read task
async fn read_task(
    mut read: SplitStream<WsStream>,
    tx: mpsc::UnboundedSender<SocketEvent>,
    cancel: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = read.next() => msg,
        };

        let event = match msg {
            Some(Ok(Message::Text(text))) => {
                SocketEvent::Message(RawMessage::Text(text.as_str().to_owned()))
            }
            Some(Ok(Message::Binary(data))) => SocketEvent::Message(RawMessage::Binary(data.to_vec())),
            Some(Ok(Message::Close(frame))) => {
                let info = match frame {
                    Some(frame) => CloseInfo::new(u16::from(frame.code), frame.reason.as_str()),
                    None => CloseInfo::new(CLOSE_NO_STATUS, ""),
                };
                let _ = tx.send(SocketEvent::Closed(info));
                break;
            }
            // Ping/pong are answered by tungstenite
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                error!("WebSocket error: {}", e);
                let _ = tx.send(SocketEvent::Error(e.to_string()));
                let _ = tx.send(SocketEvent::Closed(CloseInfo::abnormal(e.to_string())));
                break;
            }
            None => {
                let _ = tx.send(SocketEvent::Closed(CloseInfo::abnormal("stream ended")));
                break;
            }
        };

        if tx.send(event).is_err() {
            break;
        }
    }

    debug!("WebSocket read task ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::CLOSE_ABNORMAL;
    use std::future::Future;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;

    /// Accept one WebSocket client on a local port and hand it to `handler`
    async fn serve_once<F, Fut>(handler: F) -> String
    where
        F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            handler(ws).await;
        });
        format!("ws://{}", addr)
    }

    async fn next_event(connection: &mut Connection) -> SocketEvent {
        tokio::time::timeout(Duration::from_secs(5), connection.inbound.recv())
            .await
            .expect("no socket event within 5s")
            .expect("event channel closed")
    }

    /// Events up to and including the first closure
    async fn events_until_closed(connection: &mut Connection) -> Vec<SocketEvent> {
        let mut events = Vec::new();
        loop {
            let event = next_event(connection).await;
            let closed = matches!(event, SocketEvent::Closed(_));
            events.push(event);
            if closed {
                return events;
            }
        }
    }

    #[tokio::test]
    async fn test_close_frame_code_and_reason_are_forwarded() {
        let url = serve_once(|mut ws| async move {
            ws.send(Message::Text("hello".into())).await.unwrap();
            ws.close(Some(CloseFrame {
                code: CloseCode::from(4000),
                reason: "bye".into(),
            }))
            .await
            .unwrap();
        })
        .await;

        let mut connection = WebSocketConnector::new().open(&url).await.unwrap();
        assert_eq!(
            next_event(&mut connection).await,
            SocketEvent::Message(RawMessage::Text("hello".to_string()))
        );
        assert_eq!(
            next_event(&mut connection).await,
            SocketEvent::Closed(CloseInfo::new(4000, "bye"))
        );
        connection.cancel.cancel();
    }

    #[tokio::test]
    async fn test_close_without_frame_maps_to_no_status() {
        let url = serve_once(|mut ws| async move {
            ws.close(None).await.unwrap();
        })
        .await;

        let mut connection = WebSocketConnector::new().open(&url).await.unwrap();
        let event = next_event(&mut connection).await;
        assert_eq!(event, SocketEvent::Closed(CloseInfo::new(CLOSE_NO_STATUS, "")));
        match event {
            SocketEvent::Closed(info) => assert!(!info.is_abnormal()),
            other => panic!("unexpected event {:?}", other),
        }
        connection.cancel.cancel();
    }

    #[tokio::test]
    async fn test_dropped_connection_maps_to_abnormal_close() {
        let url = serve_once(|ws| async move {
            drop(ws);
        })
        .await;

        let mut connection = WebSocketConnector::new().open(&url).await.unwrap();
        let events = events_until_closed(&mut connection).await;
        match events.last() {
            Some(SocketEvent::Closed(info)) => {
                assert_eq!(info.code, CLOSE_ABNORMAL);
                assert!(info.is_abnormal());
            }
            other => panic!("unexpected event {:?}", other),
        }
        // Anything before the closure is the read error itself
        assert!(events[..events.len() - 1]
            .iter()
            .all(|event| matches!(event, SocketEvent::Error(_))));
        connection.cancel.cancel();
    }
}
