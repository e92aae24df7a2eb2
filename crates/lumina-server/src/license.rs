//! License validation hook.
//!
//! The HELO message carries the client's license blob, id and watermark.
//! What counts as a valid license is deployment policy, not protocol, so
//! the check is a trait the server takes at construction. The default
//! accepts everyone, which is the right behavior for a private offline
//! instance.

use lumina_proto::Helo;

/// Decides whether a client's HELO earns an `RPC_OK`.
///
/// Returning `false` makes the session answer `RPC_NOTIFY "Invalid
/// license"` and close without handling a command.
pub trait LicensePolicy: Send + Sync {
    /// Inspect the handshake and accept or reject the client.
    fn check_client(&self, helo: &Helo) -> bool;
}

/// Accepts every client unconditionally.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl LicensePolicy for AcceptAll {
    fn check_client(&self, helo: &Helo) -> bool {
        tracing::debug!(
            hexrays_id = format_args!("{:#010x}", helo.hexrays_id),
            watermark = helo.watermark,
            license_bytes = helo.license_blob.len(),
            "client accepted"
        );
        true
    }
}
