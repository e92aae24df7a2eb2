//! Server error types.
//!
//! Strongly typed per layer: [`StoreError`] for the persistent store,
//! [`ServerError`] for everything the runtime can hit. Conversions at the
//! boundaries keep `?` working across layers without losing the category.

use thiserror::Error;

/// Errors from the persistent store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    ///
    /// Fatal at startup. During a mid-run save the in-memory store is
    /// untouched, so the caller may retry.
    #[error("store file I/O: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file did not parse as a store snapshot.
    ///
    /// Fatal at startup; the in-memory store is dropped rather than served
    /// half-loaded.
    #[error("store snapshot did not parse: {0}")]
    Decode(String),

    /// Serializing the snapshot failed.
    #[error("store snapshot could not be written: {0}")]
    Encode(String),

    /// The snapshot was written by an incompatible build.
    #[error("unsupported store snapshot version {0}")]
    UnsupportedVersion(u32),
}

/// Errors that can occur in the server runtime.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Configuration error (certificate without key, bad PEM, bind failure).
    ///
    /// Fatal at startup. Fix the configuration and restart.
    #[error("configuration error: {0}")]
    Config(String),

    /// Socket or TLS failure.
    ///
    /// Fatal for the affected connection only; the accept loop keeps
    /// running.
    #[error("transport error: {0}")]
    Transport(String),

    /// A client sent malformed wire data.
    ///
    /// Fatal for that connection. The session answers with a notify when
    /// the socket is still writable.
    #[error("protocol error: {0}")]
    Protocol(#[from] lumina_proto::ProtocolError),

    /// Store failure, see [`StoreError`].
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
