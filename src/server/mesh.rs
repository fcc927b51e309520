//! In-process cluster transport
//!
//! Resolves addresses to servers living in the same process, so a whole
//! cluster can run without sockets. Forwarded calls cross the same `Peer`
//! surface the gRPC transport uses, which keeps routing, splits, and
//! merges observable end to end in tests and demos.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tonic::async_trait;

use crate::common::{Error, Result};
use crate::server::transport::{Dialer, Peer, SplitUpdate};
use crate::server::Server;
use crate::storage::Node;

/// Address registry for single-process clusters
#[derive(Default)]
pub struct LocalMesh {
    servers: Mutex<HashMap<String, Arc<Server>>>,
}

impl LocalMesh {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, addr: impl Into<String>, server: Arc<Server>) {
        self.servers.lock().unwrap().insert(addr.into(), server);
    }
}

#[async_trait]
impl Dialer for LocalMesh {
    async fn dial(&self, addr: &str) -> Result<Box<dyn Peer>> {
        let server = self
            .servers
            .lock()
            .unwrap()
            .get(addr)
            .cloned()
            .ok_or_else(|| Error::Transport(format!("unknown address {}", addr)))?;
        Ok(Box::new(LocalPeer { server }))
    }
}

struct LocalPeer {
    server: Arc<Server>,
}

#[async_trait]
impl Peer for LocalPeer {
    async fn get(&self, key: &str, location: u64) -> Result<String> {
        self.server.handle_get(key, location).await
    }

    async fn set(&self, key: &str, value: &str, dep: u64) -> Result<u64> {
        self.server.handle_set(key, value, dep).await
    }

    async fn get_node(&self, location: u64) -> Result<Node> {
        self.server.handle_get_node(location).await
    }

    async fn add_node(&self, node: Node) -> Result<()> {
        self.server.handle_add_node(node);
        Ok(())
    }

    async fn add_child(&self, location: u64, child: u64) -> Result<Node> {
        self.server.handle_add_child(location, child).await
    }

    async fn remove_children(&self, location: u64) -> Result<()> {
        self.server.handle_remove_children(location).await
    }

    async fn split(&self, update: SplitUpdate) -> Result<()> {
        self.server.handle_split(update);
        Ok(())
    }

    async fn set_indexing_lock(&self, lock: bool) -> Result<bool> {
        Ok(self.server.handle_set_indexing_lock(lock))
    }

    async fn set_merge_function(&self, location: u64, name: &str) -> Result<()> {
        self.server.handle_set_merge_function(location, name);
        Ok(())
    }

    async fn set_global_merge_function(&self, name: &str) -> Result<()> {
        self.server.handle_set_global_merge_function(name).await
    }
}
