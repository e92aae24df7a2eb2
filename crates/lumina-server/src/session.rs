//! Per-connection RPC session.
//!
//! Each accepted connection runs this short state machine exactly once:
//!
//! ```text
//! AWAIT_HELO --helo, license ok--> AWAIT_CMD --push/pull--> reply, close
//! ```
//!
//! Anything else (wrong first message, rejected license, reserved or
//! malformed command) answers a notify where the socket still writes, then
//! closes. One command per connection is the client's own behavior: it
//! reconnects for every operation.
//!
//! All reads and writes are bounded by the configured socket timeout so a
//! stalled client cannot pin a worker.

use std::time::Duration;

use lumina_proto::{
    PROTOCOL_VERSION, Packet, ProtocolError, PullMdResult, PushMdResult, RpcCode, RpcMessage,
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    time::timeout,
};

use crate::{error::ServerError, license::LicensePolicy, store::Store};

/// Read one framed packet off the stream.
///
/// The length field is validated against the payload cap before the
/// payload buffer is allocated, so a hostile length cannot balloon memory.
async fn read_packet<S>(stream: &mut S, io_timeout: Duration) -> Result<Packet, ServerError>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; Packet::HEADER_SIZE];
    timeout(io_timeout, stream.read_exact(&mut header))
        .await
        .map_err(|_| ServerError::Transport("read timed out".to_string()))??;

    let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let code = header[4];

    if length > Packet::MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size: length as usize,
            max: Packet::MAX_PAYLOAD_SIZE as usize,
        }
        .into());
    }

    let mut payload = vec![0u8; length as usize];
    timeout(io_timeout, stream.read_exact(&mut payload))
        .await
        .map_err(|_| ServerError::Transport("read timed out".to_string()))??;

    Ok(Packet::new(code, payload))
}

/// Frame and send one message.
async fn write_packet<S>(
    stream: &mut S,
    io_timeout: Duration,
    message: &RpcMessage,
) -> Result<(), ServerError>
where
    S: AsyncWrite + Unpin,
{
    tracing::debug!(code = ?message.code(), "sending packet");

    let mut wire = Vec::new();
    message.to_packet()?.encode(&mut wire)?;

    timeout(io_timeout, async {
        stream.write_all(&wire).await?;
        stream.flush().await
    })
    .await
    .map_err(|_| ServerError::Transport("write timed out".to_string()))??;

    Ok(())
}

/// Run one session to completion.
///
/// Errors returned here are logged by the caller and never reach the
/// accept loop.
pub(crate) async fn run_session<S>(
    stream: &mut S,
    store: &Store,
    license: &dyn LicensePolicy,
    io_timeout: Duration,
) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // AWAIT_HELO
    let packet = read_packet(stream, io_timeout).await?;
    tracing::debug!(code = packet.code, "received packet");

    let helo = match RpcMessage::from_packet(&packet) {
        Ok(RpcMessage::Helo(helo)) => helo,
        Ok(other) => {
            tracing::debug!(code = other.code().to_u8(), "first message was not a helo");
            return write_packet(stream, io_timeout, &RpcMessage::notify("Expected helo")).await;
        },
        Err(err) => {
            tracing::error!(%err, "undecodable first packet");
            let reply = if packet.code_enum() == Some(RpcCode::Helo) {
                "Malformed packet"
            } else {
                "Expected helo"
            };
            return write_packet(stream, io_timeout, &RpcMessage::notify(reply)).await;
        },
    };

    if helo.protocol != PROTOCOL_VERSION {
        // The client is not rejected over this; the protocol never changed
        // in a way that matters here.
        tracing::debug!(protocol = helo.protocol, "client announced a different protocol version");
    }

    if !license.check_client(&helo) {
        return write_packet(stream, io_timeout, &RpcMessage::notify("Invalid license")).await;
    }

    write_packet(stream, io_timeout, &RpcMessage::Ok).await?;

    // AWAIT_CMD
    let packet = read_packet(stream, io_timeout).await?;
    tracing::debug!(code = packet.code, "received packet");

    let command = match RpcMessage::from_packet(&packet) {
        Ok(command) => command,
        Err(ProtocolError::UnknownCode(code)) => {
            tracing::error!(code, "message handler not implemented");
            return write_packet(stream, io_timeout, &RpcMessage::notify("Unknown command")).await;
        },
        Err(err) => {
            tracing::error!(%err, "undecodable command payload");
            return write_packet(stream, io_timeout, &RpcMessage::notify("Malformed packet"))
                .await;
        },
    };

    match command {
        RpcMessage::PushMd(push) => {
            let results_flags =
                push.func_mds.iter().map(|func_md| u32::from(store.push(func_md))).collect();

            tracing::debug!(functions = push.func_mds.len(), "push handled");
            write_packet(
                stream,
                io_timeout,
                &RpcMessage::PushMdResult(PushMdResult { results_flags }),
            )
            .await
        },
        RpcMessage::PullMd(pull) => {
            let mut found = Vec::with_capacity(pull.func_sigs.len());
            let mut results = Vec::new();

            for signature in &pull.func_sigs {
                match store.pull(signature) {
                    Some(info) => {
                        found.push(1);
                        results.push(info);
                    },
                    None => found.push(0),
                }
            }

            tracing::debug!(requested = found.len(), hits = results.len(), "pull handled");
            write_packet(
                stream,
                io_timeout,
                &RpcMessage::PullMdResult(PullMdResult { found, results }),
            )
            .await
        },
        other => {
            tracing::error!(code = other.code().to_u8(), "message handler not implemented");
            write_packet(stream, io_timeout, &RpcMessage::notify("Unknown command")).await
        },
    }
}
