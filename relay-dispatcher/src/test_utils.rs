use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use relay_core::{
    Acknowledge, ChainCommunicationError, ChainEndpoint, ChainResult, ExtrinsicStatus,
    SignedExtrinsic, StatusUpdate, Subscription, H256,
};
use tokio::{sync::mpsc, task::JoinHandle};

#[derive(Debug, Clone, Default)]
pub struct AckCounter(Arc<AtomicUsize>);

impl AckCounter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct CountingAck(AckCounter);

impl CountingAck {
    pub fn new_pair() -> (Box<dyn Acknowledge>, AckCounter) {
        let counter = AckCounter::default();
        (Box::new(CountingAck(counter.clone())), counter)
    }
}

#[async_trait]
impl Acknowledge for CountingAck {
    async fn ack(self: Box<Self>) {
        self.0 .0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Scripted endpoint. Reports inclusion in `block` after `inclusion_delay`
/// when it accepts the submission.
#[derive(Debug)]
pub struct FakeEndpoint {
    url: String,
    nonce: Option<u64>,
    nonce_delay: Duration,
    accepts: bool,
    inclusion: Option<(Duration, H256)>,
    closes_stream: bool,
    pub submissions: AtomicUsize,
    pub unsubscribed: Arc<AtomicBool>,
}

impl FakeEndpoint {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            nonce: None,
            nonce_delay: Duration::ZERO,
            accepts: false,
            inclusion: None,
            closes_stream: false,
            submissions: AtomicUsize::new(0),
            unsubscribed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn with_nonce_delay(mut self, delay: Duration) -> Self {
        self.nonce_delay = delay;
        self
    }

    pub fn accepting(mut self) -> Self {
        self.accepts = true;
        self
    }

    pub fn including(mut self, delay: Duration, block: H256) -> Self {
        self.accepts = true;
        self.inclusion = Some((delay, block));
        self
    }

    /// Accept the submission, report `Dropped` and end the stream
    pub fn dropping(mut self) -> Self {
        self.accepts = true;
        self.closes_stream = true;
        self
    }

    pub fn was_unsubscribed(&self) -> bool {
        self.unsubscribed.load(Ordering::SeqCst)
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainEndpoint for FakeEndpoint {
    fn url(&self) -> &str {
        &self.url
    }

    async fn account_nonce(&self, _account: &str) -> ChainResult<u64> {
        tokio::time::sleep(self.nonce_delay).await;
        self.nonce.ok_or(ChainCommunicationError::ConnectionClosed)
    }

    async fn submit_and_watch(
        &self,
        _extrinsic: &SignedExtrinsic,
        updates: mpsc::Sender<StatusUpdate>,
    ) -> ChainResult<Box<dyn Subscription>> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        if !self.accepts {
            return Err(ChainCommunicationError::Rpc {
                code: 1010,
                message: "Invalid Transaction".into(),
            });
        }
        let url = self.url.clone();
        let inclusion = self.inclusion;
        let closes_stream = self.closes_stream;
        let forwarder = tokio::spawn(async move {
            let _ = updates
                .send(StatusUpdate::new(url.clone(), ExtrinsicStatus::Ready))
                .await;
            if closes_stream {
                let _ = updates
                    .send(StatusUpdate::new(url, ExtrinsicStatus::Dropped))
                    .await;
                return;
            }
            match inclusion {
                Some((delay, block)) => {
                    tokio::time::sleep(delay).await;
                    let _ = updates
                        .send(StatusUpdate::new(url, ExtrinsicStatus::InBlock(block)))
                        .await;
                }
                // keep the stream open without ever reporting inclusion
                None => std::future::pending::<()>().await,
            }
            std::future::pending::<()>().await
        });
        Ok(Box::new(FakeSubscription {
            forwarder,
            unsubscribed: self.unsubscribed.clone(),
        }))
    }
}

#[derive(Debug)]
struct FakeSubscription {
    forwarder: JoinHandle<()>,
    unsubscribed: Arc<AtomicBool>,
}

#[async_trait]
impl Subscription for FakeSubscription {
    async fn unsubscribe(self: Box<Self>) {
        self.forwarder.abort();
        self.unsubscribed.store(true, Ordering::SeqCst);
    }
}

pub fn block(n: u64) -> H256 {
    H256::from_low_u64_be(n)
}
