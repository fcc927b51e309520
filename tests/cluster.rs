//! End-to-end tests for version chains, forks, and merges
//!
//! Clusters run over the in-process mesh: same routing and peer surface
//! as the wired transport, no sockets.

use std::sync::{Arc, Mutex};

use tonic::async_trait;

use branchkv::actions::ActionInvoker;
use branchkv::indexing::IndexingService;
use branchkv::server::mesh::LocalMesh;
use branchkv::storage::{self, Store};
use branchkv::{Config, Error, Server};

type Handler = Box<dyn Fn(&str, &[u8]) -> branchkv::Result<Vec<u8>> + Send + Sync>;

/// Invoker that records every call and answers through a closure
struct RecordingInvoker {
    calls: Mutex<Vec<String>>,
    handler: Handler,
}

impl RecordingInvoker {
    fn new(handler: Handler) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            handler,
        })
    }

    fn unreachable() -> Arc<Self> {
        Self::new(Box::new(|name, _| {
            Err(Error::Other(format!("unexpected action call: {}", name)))
        }))
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ActionInvoker for RecordingInvoker {
    async fn invoke(&self, name: &str, payload: &[u8]) -> branchkv::Result<Vec<u8>> {
        self.calls.lock().unwrap().push(name.to_string());
        (self.handler)(name, payload)
    }
}

struct Cluster {
    servers: Vec<Arc<Server>>,
    stores: Vec<Arc<Store>>,
}

fn cluster(addrs: &[&str], threshold: usize, invoker: Arc<RecordingInvoker>) -> Cluster {
    let mesh = LocalMesh::new();
    let mut servers = Vec::new();
    let mut stores = Vec::new();

    for addr in addrs {
        let config = Config {
            servers: addrs.iter().map(|a| a.to_string()).collect(),
            available_servers: Vec::new(),
            self_addr: addr.to_string(),
            initial: addrs[0].to_string(),
            threshold,
        };
        let store = Arc::new(Store::new());
        let server = Server::new(
            config,
            store.clone(),
            Arc::new(IndexingService::new()),
            mesh.clone(),
            invoker.clone(),
        );
        mesh.register(*addr, server.clone());
        servers.push(server);
        stores.push(store);
    }

    Cluster { servers, stores }
}

#[tokio::test]
async fn test_single_server_set_and_get() {
    let invoker = RecordingInvoker::unreachable();
    let cluster = cluster(&["a:1"], 64, invoker);
    let server = &cluster.servers[0];

    let l1 = server.handle_set("a", "1", 0).await.unwrap();
    let l2 = server.handle_set("b", "2", l1).await.unwrap();

    assert_eq!(server.handle_get("a", l2).await.unwrap(), "1");
    assert_eq!(server.handle_get("b", l2).await.unwrap(), "2");

    let err = server.handle_get("c", l2).await.unwrap_err();
    assert_eq!(err.to_string(), "Key c not found");
}

#[tokio::test]
async fn test_version_chain_reads_by_start_node() {
    let invoker = RecordingInvoker::unreachable();
    let cluster = cluster(&["a:1"], 64, invoker);
    let server = &cluster.servers[0];

    let l1 = server.handle_set("x", "1", 0).await.unwrap();
    let l2 = server.handle_set("x", "2", l1).await.unwrap();

    // Each version node sees its own value for the key
    assert_eq!(server.handle_get("x", l1).await.unwrap(), "1");
    assert_eq!(server.handle_get("x", l2).await.unwrap(), "2");
}

#[tokio::test]
async fn test_fork_without_merge_function_keeps_both_branches() {
    let invoker = RecordingInvoker::unreachable();
    let cluster = cluster(&["a:1"], 64, invoker.clone());
    let server = &cluster.servers[0];

    let l1 = server.handle_set("x", "1", 0).await.unwrap();
    let l2 = server.handle_set("y", "a", l1).await.unwrap();
    let l3 = server.handle_set("z", "b", l1).await.unwrap();

    let parent = server.handle_get_node(l1).await.unwrap();
    assert_eq!(parent.children, vec![l2, l3]);
    assert_eq!(invoker.call_count(), 0);

    // Both branches stay readable
    assert_eq!(server.handle_get("y", l2).await.unwrap(), "a");
    assert_eq!(server.handle_get("z", l3).await.unwrap(), "b");
}

#[tokio::test]
async fn test_fork_with_merge_function_replaces_children() {
    let minted = Arc::new(Mutex::new(None::<u64>));
    let minted_in_handler = minted.clone();

    let invoker = RecordingInvoker::new(Box::new(move |_, payload| {
        let parent: storage::Node = serde_json::from_slice(payload)?;
        assert_eq!(parent.children.len(), 2);

        let replacement = storage::create_node("x", "merged", parent.location);
        *minted_in_handler.lock().unwrap() = Some(replacement.location);
        Ok(serde_json::to_vec(&serde_json::json!({ "nodes": [replacement] }))?)
    }));

    let cluster = cluster(&["a:1"], 64, invoker.clone());
    let server = &cluster.servers[0];

    let l1 = server.handle_set("x", "1", 0).await.unwrap();
    server.handle_set_merge_function(l1, "reconcile");

    let l2 = server.handle_set("y", "a", l1).await.unwrap();
    let l3 = server.handle_set("z", "b", l1).await.unwrap();

    assert_eq!(invoker.call_count(), 1);
    let merged_loc = minted.lock().unwrap().expect("merge ran");

    // The fork collapsed into the single replacement child
    let parent = server.handle_get_node(l1).await.unwrap();
    assert_eq!(parent.children, vec![merged_loc]);

    // The forked children are gone from their owning server
    for removed in [l2, l3] {
        match server.handle_get_node(removed).await.unwrap_err() {
            Error::LocationNotFound(loc) => assert_eq!(loc, removed),
            other => panic!("unexpected error: {}", other),
        }
    }

    // The replacement chains back to the shared history
    assert_eq!(server.handle_get("x", merged_loc).await.unwrap(), "merged");
    assert_eq!(cluster.stores[0].size(), 2);
}

#[tokio::test]
async fn test_malformed_merge_response_surfaces_decoding_error() {
    let invoker = RecordingInvoker::new(Box::new(|_, _| Ok(b"{\"wrong\": []}".to_vec())));
    let cluster = cluster(&["a:1"], 64, invoker);
    let server = &cluster.servers[0];

    let l1 = server.handle_set("x", "1", 0).await.unwrap();
    server.handle_set_merge_function(l1, "reconcile");
    server.handle_set("y", "a", l1).await.unwrap();

    let err = server.handle_set("z", "b", l1).await.unwrap_err();
    assert!(matches!(err, Error::Decoding(_)), "got: {}", err);
}

#[tokio::test]
async fn test_global_merge_function_reaches_every_server() {
    let invoker = RecordingInvoker::unreachable();
    let cluster = cluster(&["a:1", "b:2", "c:3"], 64, invoker);

    cluster.servers[1]
        .handle_set_global_merge_function("gm")
        .await
        .unwrap();

    for server in &cluster.servers {
        assert_eq!(server.global_merge_function(), "gm");
    }
}

#[tokio::test]
async fn test_global_merge_function_used_as_fallback() {
    let minted = Arc::new(Mutex::new(None::<u64>));
    let minted_in_handler = minted.clone();

    let invoker = RecordingInvoker::new(Box::new(move |name, payload| {
        assert_eq!(name, "gm");
        let parent: storage::Node = serde_json::from_slice(payload)?;
        let replacement = storage::create_node("w", "settled", parent.location);
        *minted_in_handler.lock().unwrap() = Some(replacement.location);
        Ok(serde_json::to_vec(&serde_json::json!({ "nodes": [replacement] }))?)
    }));

    let cluster = cluster(&["a:1"], 64, invoker.clone());
    let server = &cluster.servers[0];

    server.handle_set_global_merge_function("gm").await.unwrap();

    let l1 = server.handle_set("x", "1", 0).await.unwrap();
    server.handle_set("y", "a", l1).await.unwrap();
    server.handle_set("z", "b", l1).await.unwrap();

    assert_eq!(invoker.call_count(), 1);
    let merged_loc = minted.lock().unwrap().expect("merge ran");
    let parent = server.handle_get_node(l1).await.unwrap();
    assert_eq!(parent.children, vec![merged_loc]);
}

#[tokio::test]
async fn test_concurrent_sets_serialize_through_the_store() {
    let invoker = RecordingInvoker::unreachable();
    let cluster = cluster(&["a:1"], 1024, invoker);
    let server = cluster.servers[0].clone();

    let mut handles = Vec::new();
    for i in 0..20 {
        let server = server.clone();
        handles.push(tokio::spawn(async move {
            let key = format!("key-{}", i);
            let loc = server.handle_set(&key, "v", 0).await.unwrap();
            (key, loc)
        }));
    }

    for handle in handles {
        let (key, loc) = handle.await.unwrap();
        assert_eq!(server.handle_get(&key, loc).await.unwrap(), "v");
    }
    assert_eq!(cluster.stores[0].size(), 20);
}

#[tokio::test]
async fn test_dialing_unknown_address_is_a_transport_error() {
    use branchkv::server::transport::Dialer;

    let mesh = LocalMesh::new();
    let err = mesh.dial("nowhere:0").await.map(|_| ()).unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
}
