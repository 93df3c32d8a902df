use std::{
    collections::HashMap,
    fmt::Debug,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use relay_core::{ChainCommunicationError, ChainResult};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, instrument, trace, warn};

type Reply = oneshot::Sender<ChainResult<Value>>;

/// A JSON-RPC 2.0 client over a single WebSocket connection.
///
/// Responses are matched to requests by id and subscription notifications are
/// routed by subscription id. When the socket drops, every pending request
/// fails with `ConnectionClosed`, every subscription stream ends, and the next
/// call opens a new connection.
pub struct WsRpcClient {
    url: String,
    request_timeout: Duration,
    next_id: AtomicU64,
    connection: tokio::sync::Mutex<Option<Connection>>,
}

/// Notifications of one subscription
#[derive(Debug)]
pub struct RpcSubscription {
    /// Subscription id assigned by the node
    pub id: String,
    /// `params.result` of every notification, in arrival order
    pub notifications: mpsc::UnboundedReceiver<Value>,
}

struct Connection {
    outgoing: mpsc::UnboundedSender<Message>,
    router: Arc<Router>,
}

#[derive(Default)]
struct Router {
    pending: Mutex<HashMap<u64, Pending>>,
    subscriptions: Mutex<HashMap<String, mpsc::UnboundedSender<Value>>>,
    closed: AtomicBool,
}

enum Pending {
    Call(Reply),
    Subscribe {
        reply: Reply,
        sink: mpsc::UnboundedSender<Value>,
    },
}

#[derive(Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct Incoming {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<ErrorObject>,
    params: Option<NotificationParams>,
}

#[derive(Deserialize)]
struct ErrorObject {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct NotificationParams {
    subscription: Value,
    result: Value,
}

fn subscription_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl Debug for WsRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsRpcClient")
            .field("url", &self.url)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl WsRpcClient {
    /// Connect to `url`. Fails if the node cannot be reached.
    pub async fn connect(url: &str, request_timeout: Duration) -> ChainResult<Self> {
        let client = Self {
            url: url.to_string(),
            request_timeout,
            next_id: AtomicU64::new(1),
            connection: tokio::sync::Mutex::new(None),
        };
        client.open().await?;
        Ok(client)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Call `method` and decode its result
    #[instrument(skip(self, params), fields(url = %self.url))]
    pub async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> ChainResult<T> {
        let (reply, response) = oneshot::channel();
        let id = self.send(method, params, Pending::Call(reply)).await?;
        let value = self.await_reply(id, response).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Call a subscribing `method`. Notifications that arrive right after the
    /// node's answer are not lost.
    #[instrument(skip(self, params), fields(url = %self.url))]
    pub async fn subscribe(&self, method: &str, params: Value) -> ChainResult<RpcSubscription> {
        let (reply, response) = oneshot::channel();
        let (sink, notifications) = mpsc::unbounded_channel();
        let request_id = self
            .send(method, params, Pending::Subscribe { reply, sink })
            .await?;
        let id = subscription_key(&self.await_reply(request_id, response).await?);
        debug!(subscription = %id, "Subscribed");
        Ok(RpcSubscription { id, notifications })
    }

    /// Stop routing notifications of `id` and tell the node with
    /// `unsubscribe_method`.
    pub async fn unsubscribe(&self, unsubscribe_method: &str, id: &str) -> ChainResult<()> {
        if let Some(connection) = self.connection.lock().await.as_ref() {
            connection.router.subscriptions.lock().remove(id);
        }
        let _: Value = self
            .request(unsubscribe_method, Value::Array(vec![Value::String(id.into())]))
            .await?;
        Ok(())
    }

    async fn send(
        &self,
        method: &str,
        params: Value,
        pending: Pending,
    ) -> ChainResult<u64> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let text = serde_json::to_string(&Request {
            jsonrpc: "2.0",
            id,
            method,
            params,
        })?;

        let mut guard = self.connection.lock().await;
        let reconnect = guard
            .as_ref()
            .map_or(true, |c| c.router.closed.load(Ordering::Acquire));
        if reconnect {
            warn!(url = %self.url, "Reconnecting to node");
            *guard = Some(self.dial().await?);
        }
        let Some(connection) = guard.as_ref() else {
            return Err(ChainCommunicationError::ConnectionClosed);
        };
        connection.router.pending.lock().insert(id, pending);
        trace!(id, method, "Sending request");
        if connection.outgoing.send(Message::Text(text)).is_err() {
            connection.router.pending.lock().remove(&id);
            return Err(ChainCommunicationError::ConnectionClosed);
        }
        Ok(id)
    }

    async fn await_reply(
        &self,
        id: u64,
        response: oneshot::Receiver<ChainResult<Value>>,
    ) -> ChainResult<Value> {
        match tokio::time::timeout(self.request_timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ChainCommunicationError::ConnectionClosed),
            Err(_) => {
                if let Some(connection) = self.connection.lock().await.as_ref() {
                    connection.router.pending.lock().remove(&id);
                }
                Err(ChainCommunicationError::Timeout(self.request_timeout))
            }
        }
    }

    async fn open(&self) -> ChainResult<()> {
        let connection = self.dial().await?;
        *self.connection.lock().await = Some(connection);
        Ok(())
    }

    async fn dial(&self) -> ChainResult<Connection> {
        let (stream, _) = tokio::time::timeout(self.request_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| ChainCommunicationError::Timeout(self.request_timeout))?
            .map_err(|e| ChainCommunicationError::Transport(e.to_string()))?;
        debug!(url = %self.url, "Connected to node");

        let (mut write, mut read) = stream.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let router = Arc::new(Router::default());

        let writer_router = router.clone();
        tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                if let Err(error) = write.send(message).await {
                    warn!(%error, "Failed to write to node socket");
                    break;
                }
            }
            writer_router.close();
        });

        let reader_router = router.clone();
        let url = self.url.clone();
        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => reader_router.dispatch(&text),
                    Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                        Ok(text) => reader_router.dispatch(text),
                        Err(_) => warn!(url = %url, "Dropping non utf-8 frame"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(error) => {
                        warn!(url = %url, %error, "Node socket failed");
                        break;
                    }
                }
            }
            debug!(url = %url, "Node socket closed");
            reader_router.close();
        });

        Ok(Connection { outgoing, router })
    }
}

impl Router {
    fn dispatch(&self, text: &str) {
        let incoming: Incoming = match serde_json::from_str(text) {
            Ok(incoming) => incoming,
            Err(error) => {
                warn!(%error, "Dropping malformed message from node");
                return;
            }
        };

        if let Some(id) = incoming.id {
            let Some(pending) = self.pending.lock().remove(&id) else {
                debug!(id, "Response to unknown request");
                return;
            };
            let result = match incoming.error {
                Some(ErrorObject { code, message }) => {
                    Err(ChainCommunicationError::Rpc { code, message })
                }
                None => Ok(incoming.result.unwrap_or(Value::Null)),
            };
            match pending {
                Pending::Call(reply) => {
                    let _ = reply.send(result);
                }
                Pending::Subscribe { reply, sink } => {
                    // registered before replying so no notification is missed
                    if let Ok(sub_id) = &result {
                        self.subscriptions
                            .lock()
                            .insert(subscription_key(sub_id), sink);
                    }
                    let _ = reply.send(result);
                }
            }
            return;
        }

        if let Some(NotificationParams {
            subscription,
            result,
        }) = incoming.params
        {
            let key = subscription_key(&subscription);
            let mut subscriptions = self.subscriptions.lock();
            let delivered = subscriptions
                .get(&key)
                .map(|sink| sink.send(result).is_ok());
            match delivered {
                Some(true) => {}
                Some(false) => {
                    subscriptions.remove(&key);
                }
                None => trace!(subscription = %key, "Notification for unknown subscription"),
            }
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        // dropping the senders fails pending calls and ends the streams
        self.pending.lock().clear();
        self.subscriptions.lock().clear();
    }
}
