// In-memory transport for lifecycle and controller tests.

#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use labsync_api::{Connector, Link, LinkPeer};
use tokio::sync::mpsc;
use tokio::time::Instant;
use url::Url;

use crate::config::SyncConfig;
use crate::connection::{SyncClient, new_shared_state};
use crate::model::AlertSeverity;

/// Hands the server side of every opened link to the test.
#[derive(Clone)]
pub(crate) struct MockConnector {
    peers: mpsc::UnboundedSender<LinkPeer>,
    pub refuse: Arc<AtomicBool>,
    /// How long `open` takes before it resolves.
    pub open_delay: Arc<Mutex<Option<Duration>>>,
    pub opens: Arc<Mutex<Vec<(Instant, Url)>>>,
}

impl Connector for MockConnector {
    async fn open(&self, url: &Url) -> Result<Link, labsync_api::Error> {
        self.opens.lock().unwrap().push((Instant::now(), url.clone()));
        let delay = *self.open_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.refuse.load(Ordering::SeqCst) {
            return Err(labsync_api::Error::WebSocketConnect("refused".into()));
        }
        let (link, peer) = Link::duplex();
        let _ = self.peers.send(peer);
        Ok(link)
    }
}

pub(crate) struct Harness {
    pub client: SyncClient<MockConnector>,
    pub connector: MockConnector,
    peers: mpsc::UnboundedReceiver<LinkPeer>,
}

impl Harness {
    pub fn new() -> Self {
        let (tx, peers) = mpsc::unbounded_channel();
        let connector = MockConnector {
            peers: tx,
            refuse: Arc::new(AtomicBool::new(false)),
            open_delay: Arc::default(),
            opens: Arc::default(),
        };
        let config = SyncConfig::new("ws://lab.test/ws".parse().unwrap());
        let state = new_shared_state(&config);
        let client = SyncClient::with_connector(config, connector.clone(), state).unwrap();
        Self {
            client,
            connector,
            peers,
        }
    }

    /// Connect and return the server side once the link is up.
    pub async fn connected(&mut self) -> LinkPeer {
        self.client.connect().await;
        let peer = self.open_peer().await;
        settle().await;
        peer
    }

    pub async fn open_peer(&mut self) -> LinkPeer {
        self.peers.recv().await.unwrap()
    }

    pub fn opens(&self) -> Vec<(Instant, Url)> {
        self.connector.opens.lock().unwrap().clone()
    }

    pub fn open_count(&self) -> usize {
        self.opens().len()
    }

    pub async fn alerts(&self) -> Vec<(AlertSeverity, String)> {
        self.client
            .state()
            .lock()
            .await
            .alerts()
            .iter()
            .map(|a| (a.severity, a.message.clone()))
            .collect()
    }
}

/// Let spawned tasks run until idle. Only meaningful with paused time.
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
