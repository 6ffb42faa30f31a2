//! The server's own published state.
//!
//! ```text
//! <root>/
//! ├── version   read-only   crate version
//! ├── uptime    read-only   seconds since start
//! ├── nodes     read-only   one line per registered node
//! ├── motd      read-write  free text held in memory
//! ├── tick      read-write  heartbeat counter; watch it to see changes,
//! │                         write a number to reset it
//! └── state/    key-store   scratch keys for clients
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use procnode_kernel::{
    path, KeyStoreNode, NodeId, ProcNode, ProcResult, ProcRouter, ReadOnlyNode, ReadWriteNode,
};
use tokio::task::JoinHandle;

/// Nodes the server registers for itself, plus the state behind them.
pub struct BuiltinNodes {
    ticks: Arc<AtomicU64>,
    motd: Arc<Mutex<String>>,
    tick_node: Arc<ReadWriteNode>,
    motd_node: Arc<ReadWriteNode>,
    state: Arc<KeyStoreNode>,
    ids: Vec<NodeId>,
}

impl BuiltinNodes {
    /// Register the built-in nodes under `root`.
    pub fn install(router: &Arc<ProcRouter>, root: &str) -> ProcResult<Self> {
        let root = path::clean(root);
        let started = Instant::now();
        let ticks = Arc::new(AtomicU64::new(0));
        let motd = Arc::new(Mutex::new(String::from("welcome\n")));
        let version = ReadOnlyNode::from_text(root.as_str(), "version", || {
            format!("{}\n", env!("CARGO_PKG_VERSION"))
        })?;

        let uptime = ReadOnlyNode::from_text(root.as_str(), "uptime", move || {
            format!("{:.3}\n", started.elapsed().as_secs_f64())
        })?;

        let weak: Weak<ProcRouter> = Arc::downgrade(router);
        let listing = ReadOnlyNode::new(root.as_str(), "nodes", move || {
            let router = weak
                .upgrade()
                .ok_or_else(|| anyhow::anyhow!("router shut down"))?;
            let listing: String = router
                .nodes()
                .iter()
                .map(|info| format!("{} {} {}\n", info.id, info.kind, info.directory))
                .collect();
            Ok(listing.into_bytes())
        })?;

        let motd_read = motd.clone();
        let motd_write = motd.clone();
        let motd_node = Arc::new(ReadWriteNode::from_text(
            root.as_str(),
            "motd",
            move || motd_read.lock().clone(),
            move |text| *motd_write.lock() = text,
        )?);

        let tick_read = ticks.clone();
        let tick_write = ticks.clone();
        let tick_node = Arc::new(ReadWriteNode::new(
            root.as_str(),
            "tick",
            move || Ok(format!("{}\n", tick_read.load(Ordering::SeqCst)).into_bytes()),
            move |bytes| {
                let text = String::from_utf8(bytes)?;
                let value: u64 = text.trim().parse()?;
                tick_write.store(value, Ordering::SeqCst);
                Ok(())
            },
        )?);

        let state = Arc::new(KeyStoreNode::new(path::join(&root, "state")));

        // Everything is built before anything is registered.
        let nodes: [Arc<dyn ProcNode>; 6] = [
            Arc::new(version),
            Arc::new(uptime),
            Arc::new(listing),
            motd_node.clone(),
            tick_node.clone(),
            state.clone(),
        ];
        let ids: Vec<NodeId> = nodes.into_iter().map(|node| router.register(node)).collect();

        tracing::info!(root = %root, nodes = ids.len(), "installed built-in nodes");
        Ok(Self {
            ticks,
            motd,
            tick_node,
            motd_node,
            state,
            ids,
        })
    }

    /// Advance the heartbeat and wake anyone watching `tick`.
    pub fn tick(&self) -> ProcResult<bool> {
        self.ticks.fetch_add(1, Ordering::SeqCst);
        self.tick_node.notify_if_changed()
    }

    /// Current heartbeat count.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Replace the message of the day and wake anyone watching `motd`.
    pub fn set_motd(&self, text: impl Into<String>) -> ProcResult<bool> {
        *self.motd.lock() = text.into();
        self.motd_node.notify_if_changed()
    }

    /// The client scratch store.
    pub fn state(&self) -> &Arc<KeyStoreNode> {
        &self.state
    }

    /// Run `tick` every `interval` until the returned task is aborted.
    pub fn spawn_ticker(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let nodes = Arc::clone(self);
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.tick().await;
            loop {
                timer.tick().await;
                if let Err(e) = nodes.tick() {
                    tracing::warn!(error = %e, "heartbeat notification failed");
                }
            }
        })
    }

    /// Remove every built-in node from `router`.
    pub fn uninstall(&self, router: &ProcRouter) {
        for id in &self.ids {
            router.unregister(*id);
        }
    }
}
