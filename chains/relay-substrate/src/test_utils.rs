use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};

pub const BLOCK_HASH: &str = "0x6b1ec0b2de1b3b1f4ee1e4e6b9f4cb0a4d0b8c8b3b0c7a1e2b9d4c1f0e2a3b4c";

/// In-process Substrate node speaking just enough JSON-RPC for the relayer.
pub struct FakeNode {
    addr: SocketAddr,
    state: Arc<NodeState>,
}

#[derive(Default)]
struct NodeState {
    nonce: u64,
    includes: bool,
    close_first_connection: bool,
    connections: AtomicUsize,
    unwatched: Mutex<Vec<String>>,
}

pub struct FakeNodeBuilder {
    state: NodeState,
}

impl FakeNodeBuilder {
    pub fn nonce(mut self, nonce: u64) -> Self {
        self.state.nonce = nonce;
        self
    }

    pub fn without_inclusion(mut self) -> Self {
        self.state.includes = false;
        self
    }

    pub fn close_first_connection(mut self) -> Self {
        self.state.close_first_connection = true;
        self
    }

    pub async fn start(self) -> FakeNode {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(self.state);
        let server_state = state.clone();
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                tokio::spawn(serve(tcp, server_state.clone()));
            }
        });
        FakeNode { addr, state }
    }
}

impl FakeNode {
    pub fn builder() -> FakeNodeBuilder {
        FakeNodeBuilder {
            state: NodeState {
                nonce: 12,
                includes: true,
                ..Default::default()
            },
        }
    }

    pub async fn start() -> Self {
        Self::builder().start().await
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn unwatched(&self) -> Vec<String> {
        self.state.unwatched.lock().clone()
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }
}

fn notification(subscription: &str, result: Value) -> Message {
    Message::Text(
        json!({
            "jsonrpc": "2.0",
            "method": "author_extrinsicUpdate",
            "params": {"subscription": subscription, "result": result},
        })
        .to_string(),
    )
}

async fn serve(tcp: TcpStream, state: Arc<NodeState>) {
    let connection = state.connections.fetch_add(1, Ordering::SeqCst);
    let Ok(ws) = accept_async(tcp).await else {
        return;
    };
    let (mut write, mut read) = ws.split();
    while let Some(Ok(message)) = read.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let request: Value = serde_json::from_str(&text).unwrap();
        let id = request["id"].clone();
        let params = request["params"].clone();
        let mut replies = vec![];
        match request["method"].as_str().unwrap_or_default() {
            "system_accountNextIndex" => {
                replies.push(json!({"jsonrpc": "2.0", "id": id, "result": state.nonce}));
            }
            "author_submitAndWatchExtrinsic" if params[0] == "0xbad" => {
                replies.push(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": 1010, "message": "Invalid Transaction"},
                }));
            }
            "author_submitAndWatchExtrinsic" => {
                let subscription = format!("sub-{id}");
                replies.push(json!({"jsonrpc": "2.0", "id": id, "result": subscription}));
                let mut updates = vec![notification(&subscription, json!("ready"))];
                if state.includes {
                    updates.push(notification(&subscription, json!({"inBlock": BLOCK_HASH})));
                }
                for reply in replies.drain(..) {
                    write.send(Message::Text(reply.to_string())).await.unwrap();
                }
                for update in updates {
                    write.send(update).await.unwrap();
                }
            }
            "author_unwatchExtrinsic" => {
                if let Some(sub) = params[0].as_str() {
                    state.unwatched.lock().push(sub.to_string());
                }
                replies.push(json!({"jsonrpc": "2.0", "id": id, "result": true}));
            }
            _ => {
                replies.push(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": -32601, "message": "Method not found"},
                }));
            }
        }
        for reply in replies {
            write.send(Message::Text(reply.to_string())).await.unwrap();
        }
        if state.close_first_connection && connection == 0 {
            let _ = write.close().await;
            return;
        }
    }
}
