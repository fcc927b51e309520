//! Error types for branchkv

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Store Errors ===
    #[error("Key {0} not found")]
    KeyNotFound(String),

    #[error("Location {0:x} not found")]
    LocationNotFound(u64),

    // === Routing Errors ===
    #[error("no range mapping covers hash {0:#010x}")]
    NoMapping(u32),

    // === Merge Errors ===
    #[error("invalid merge response: {0}")]
    Decoding(#[from] serde_json::Error),

    #[error("action {name} failed: {reason}")]
    Action { name: String, reason: String },

    // === Network Errors ===
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("transport error: {0}")]
    Transport(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Convert to gRPC status for RPC responses
    pub fn to_grpc_status(&self) -> tonic::Status {
        use tonic::Code;
        match self {
            Error::KeyNotFound(_) | Error::LocationNotFound(_) => {
                tonic::Status::new(Code::NotFound, self.to_string())
            }
            Error::InvalidConfig(_) | Error::Decoding(_) => {
                tonic::Status::new(Code::InvalidArgument, self.to_string())
            }
            Error::Transport(_) | Error::NoMapping(_) => {
                tonic::Status::new(Code::Unavailable, self.to_string())
            }
            Error::Grpc(status) => status.clone(),
            _ => tonic::Status::new(Code::Internal, self.to_string()),
        }
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(e: tonic::transport::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}
