//! gRPC service adapter
//!
//! Exposes a [`Server`] as the DbService wire surface. Domain errors map
//! to gRPC status codes here and nowhere else; handlers stay transport
//! free.

use std::net::SocketAddr;
use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::proto;
use crate::proto::db_service_server::{DbService, DbServiceServer};
use crate::server::transport::SplitUpdate;
use crate::server::Server;

pub struct DbGrpcService {
    server: Arc<Server>,
}

impl DbGrpcService {
    pub fn new(server: Arc<Server>) -> Self {
        Self { server }
    }

    pub fn into_server(self) -> DbServiceServer<Self> {
        DbServiceServer::new(self)
    }
}

#[tonic::async_trait]
impl DbService for DbGrpcService {
    async fn get(
        &self,
        request: Request<proto::GetRequest>,
    ) -> Result<Response<proto::GetResponse>, Status> {
        let request = request.into_inner();
        let value = self
            .server
            .handle_get(&request.key, request.location)
            .await
            .map_err(|e| e.to_grpc_status())?;
        Ok(Response::new(proto::GetResponse { value }))
    }

    async fn set(
        &self,
        request: Request<proto::SetRequest>,
    ) -> Result<Response<proto::SetResponse>, Status> {
        let request = request.into_inner();
        let location = self
            .server
            .handle_set(&request.key, &request.value, request.dep)
            .await
            .map_err(|e| e.to_grpc_status())?;
        Ok(Response::new(proto::SetResponse { location }))
    }

    async fn get_node(
        &self,
        request: Request<proto::GetNodeRequest>,
    ) -> Result<Response<proto::Node>, Status> {
        let request = request.into_inner();
        let node = self
            .server
            .handle_get_node(request.location)
            .await
            .map_err(|e| e.to_grpc_status())?;
        Ok(Response::new(node.into()))
    }

    async fn add_node(
        &self,
        request: Request<proto::AddNodeRequest>,
    ) -> Result<Response<proto::Empty>, Status> {
        let node = request
            .into_inner()
            .node
            .ok_or_else(|| Status::invalid_argument("node is required"))?;
        self.server.handle_add_node(node.into());
        Ok(Response::new(proto::Empty {}))
    }

    async fn add_child(
        &self,
        request: Request<proto::AddChildRequest>,
    ) -> Result<Response<proto::Node>, Status> {
        let request = request.into_inner();
        let node = self
            .server
            .handle_add_child(request.location, request.child)
            .await
            .map_err(|e| e.to_grpc_status())?;
        Ok(Response::new(node.into()))
    }

    async fn remove_children(
        &self,
        request: Request<proto::RemoveChildrenRequest>,
    ) -> Result<Response<proto::Empty>, Status> {
        let request = request.into_inner();
        self.server
            .handle_remove_children(request.location)
            .await
            .map_err(|e| e.to_grpc_status())?;
        Ok(Response::new(proto::Empty {}))
    }

    async fn split(
        &self,
        request: Request<proto::SplitRequest>,
    ) -> Result<Response<proto::Empty>, Status> {
        let request = request.into_inner();
        self.server.handle_split(SplitUpdate {
            left: request.left,
            right: request.right,
            mid: request.mid,
            left_server: request.left_server,
            right_server: request.right_server,
        });
        Ok(Response::new(proto::Empty {}))
    }

    async fn set_indexing_lock(
        &self,
        request: Request<proto::SetIndexingLockRequest>,
    ) -> Result<Response<proto::SetIndexingLockResponse>, Status> {
        let success = self.server.handle_set_indexing_lock(request.into_inner().lock);
        Ok(Response::new(proto::SetIndexingLockResponse { success }))
    }

    async fn set_merge_function(
        &self,
        request: Request<proto::SetMergeFunctionRequest>,
    ) -> Result<Response<proto::Empty>, Status> {
        let request = request.into_inner();
        self.server
            .handle_set_merge_function(request.location, &request.name);
        Ok(Response::new(proto::Empty {}))
    }

    async fn set_global_merge_function(
        &self,
        request: Request<proto::SetGlobalMergeFunctionRequest>,
    ) -> Result<Response<proto::Empty>, Status> {
        let request = request.into_inner();
        self.server
            .handle_set_global_merge_function(&request.name)
            .await
            .map_err(|e| e.to_grpc_status())?;
        Ok(Response::new(proto::Empty {}))
    }
}

/// Serve the DbService on `addr` until shutdown
pub async fn serve(server: Arc<Server>, addr: SocketAddr) -> crate::Result<()> {
    tracing::info!("Starting branchkv server: {}", server.address());
    tracing::info!("  gRPC API: {}", addr);

    tonic::transport::Server::builder()
        .add_service(DbGrpcService::new(server).into_server())
        .serve(addr)
        .await?;
    Ok(())
}
