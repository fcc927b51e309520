//! gRPC peer transport

use tonic::async_trait;
use tonic::transport::Channel;

use crate::common::{Error, Result};
use crate::proto;
use crate::proto::db_service_client::DbServiceClient;
use crate::server::transport::{Dialer, Peer, SplitUpdate};
use crate::storage::Node;

/// Peer connected over a tonic channel.
///
/// The channel is cloned per call; clones share the underlying
/// connection.
pub struct GrpcPeer {
    client: DbServiceClient<Channel>,
}

#[async_trait]
impl Peer for GrpcPeer {
    async fn get(&self, key: &str, location: u64) -> Result<String> {
        let mut client = self.client.clone();
        let response = client
            .get(proto::GetRequest {
                key: key.to_string(),
                location,
            })
            .await?;
        Ok(response.into_inner().value)
    }

    async fn set(&self, key: &str, value: &str, dep: u64) -> Result<u64> {
        let mut client = self.client.clone();
        let response = client
            .set(proto::SetRequest {
                key: key.to_string(),
                value: value.to_string(),
                dep,
            })
            .await?;
        Ok(response.into_inner().location)
    }

    async fn get_node(&self, location: u64) -> Result<Node> {
        let mut client = self.client.clone();
        let response = client.get_node(proto::GetNodeRequest { location }).await?;
        Ok(response.into_inner().into())
    }

    async fn add_node(&self, node: Node) -> Result<()> {
        let mut client = self.client.clone();
        client
            .add_node(proto::AddNodeRequest {
                node: Some(node.into()),
            })
            .await?;
        Ok(())
    }

    async fn add_child(&self, location: u64, child: u64) -> Result<Node> {
        let mut client = self.client.clone();
        let response = client
            .add_child(proto::AddChildRequest { location, child })
            .await?;
        Ok(response.into_inner().into())
    }

    async fn remove_children(&self, location: u64) -> Result<()> {
        let mut client = self.client.clone();
        client
            .remove_children(proto::RemoveChildrenRequest { location })
            .await?;
        Ok(())
    }

    async fn split(&self, update: SplitUpdate) -> Result<()> {
        let mut client = self.client.clone();
        client
            .split(proto::SplitRequest {
                left: update.left,
                right: update.right,
                mid: update.mid,
                left_server: update.left_server,
                right_server: update.right_server,
            })
            .await?;
        Ok(())
    }

    async fn set_indexing_lock(&self, lock: bool) -> Result<bool> {
        let mut client = self.client.clone();
        let response = client
            .set_indexing_lock(proto::SetIndexingLockRequest { lock })
            .await?;
        Ok(response.into_inner().success)
    }

    async fn set_merge_function(&self, location: u64, name: &str) -> Result<()> {
        let mut client = self.client.clone();
        client
            .set_merge_function(proto::SetMergeFunctionRequest {
                location,
                name: name.to_string(),
            })
            .await?;
        Ok(())
    }

    async fn set_global_merge_function(&self, name: &str) -> Result<()> {
        let mut client = self.client.clone();
        client
            .set_global_merge_function(proto::SetGlobalMergeFunctionRequest {
                name: name.to_string(),
            })
            .await?;
        Ok(())
    }
}

/// Opens gRPC channels to peer servers by plain `host:port` address
#[derive(Debug, Default, Clone)]
pub struct GrpcDialer;

#[async_trait]
impl Dialer for GrpcDialer {
    async fn dial(&self, addr: &str) -> Result<Box<dyn Peer>> {
        let endpoint = format!("http://{}", addr);
        let client = DbServiceClient::connect(endpoint)
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(Box::new(GrpcPeer { client }))
    }
}
