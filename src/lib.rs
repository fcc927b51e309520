//! # branchkv
//!
//! A small distributed, versioned key-value store:
//! - Every write creates an immutable node linked to its parent version,
//!   so the data forms a version forest walked from leaf toward root
//! - Keys are partitioned across servers by a 32-bit hash-range table
//! - A server that outgrows its threshold recruits an available peer and
//!   splits its range, migrating half of its nodes
//! - Forked versions (a parent with more than one child) can be reconciled
//!   by a named external merge function
//!
//! ## Architecture
//!
//! ```text
//!        client
//!          │ Get / Set (any server)
//! ┌────────▼────────┐  forward   ┌──────────────────┐
//! │ Server A        │───────────▶│ Server B         │
//! │  range [0, m]   │            │  range [m+1, max]│
//! │  store + index  │◀───────────│  store + index   │
//! └───────┬─────────┘  Split /   └──────────────────┘
//!         │            AddNode broadcasts
//!         ▼
//!   action runtime (named merge functions, JSON in/out)
//! ```
//!
//! Each server keeps its own copy of the range table; structural changes
//! are broadcast to every member during a split.
//!
//! ## Usage
//!
//! ```bash
//! branchkv-server --config ./server.json \
//!   --action-endpoint http://localhost:3233/actions
//! ```

pub mod actions;
pub mod common;
pub mod indexing;
pub mod server;
pub mod storage;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use server::Server;

// Generated protobuf code
pub mod proto {
    tonic::include_proto!("branchkv");
}

impl From<storage::Node> for proto::Node {
    fn from(node: storage::Node) -> Self {
        proto::Node {
            location: node.location,
            dep: node.dep,
            key: node.key,
            value: node.value,
            children: node.children,
        }
    }
}

impl From<proto::Node> for storage::Node {
    fn from(node: proto::Node) -> Self {
        storage::Node {
            location: node.location,
            dep: node.dep,
            key: node.key,
            value: node.value,
            children: node.children,
        }
    }
}

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
