//! Packet pipeline.
//!
//! Outgoing: compress (data only) → seal (data and handshake kinds) →
//! segment into packets → write. Incoming is the inverse, driven entirely by
//! the received header: the pipeline opens whatever the header declares and
//! leaves policy checks (expected kind, expected cipher) to the caller.
//!
//! Every incoming message must be addressed to the receiving connection:
//! its session id and device ids are checked against the connection's, and
//! sealed bodies are opened with the connection's own session id in the
//! AAD. Init requests are exempt, since they carry the ids being agreed.

use sidp_crypto::CipherKind;

use crate::compression::CompressionKind;
use crate::connection::{Connection, ConnectionType, UNASSIGNED_SESSION};
use crate::endpoint::Endpoint;
use crate::error::{ChannelError, Error, FrameError};
use crate::message::{self, Message, MessageHeader, MessageKind, Route};
use crate::options::SessionOptions;

/// Largest cipher overhead (XSalsa20: nonce, sealed AAD digest, tag).
pub const MAX_CIPHER_OVERHEAD: usize = 24 + 16 + 16;

/// Largest compression overhead (stored marker).
pub const MAX_COMPRESSION_OVERHEAD: usize = 1;

/// Largest body a message with `max_plain` plaintext bytes can carry.
#[must_use]
pub fn max_body_len(max_plain: usize) -> usize {
    max_plain + MAX_COMPRESSION_OVERHEAD + MAX_CIPHER_OVERHEAD
}

/// How an incoming message relates to the receiving connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    /// Addressed to this connection
    Bound,
    /// First sealed handshake message on a connection with no session
    Adopt,
    /// Clear message outside any session: init requests, and alerts from a
    /// peer that has not learned the session
    Unscoped,
}

fn admit<E: Endpoint>(
    conn: &Connection<E>,
    kind: MessageKind,
    route: &Route,
) -> Result<Admission, ChannelError> {
    match kind {
        MessageKind::Init => return Ok(Admission::Unscoped),
        MessageKind::Alert if route.session_id == UNASSIGNED_SESSION => {
            return Ok(Admission::Unscoped);
        }
        _ => {}
    }

    let misaddressed = ChannelError::Misaddressed {
        source: route.source_device_id,
        dest: route.dest_device_id,
    };
    let routing = conn.connection_type() == ConnectionType::Routing;

    let session = conn.session_id();
    if session == UNASSIGNED_SESSION && matches!(kind, MessageKind::Auth | MessageKind::Negotiate) {
        // Only the local device can be checked before the peer is known.
        if !routing && route.dest_device_id != conn.source_device_id() {
            return Err(misaddressed);
        }
        return Ok(Admission::Adopt);
    }

    if route.session_id != session {
        return Err(ChannelError::SessionMismatch {
            expected: session,
            actual: route.session_id,
        });
    }

    // Routing links share one id pair; other links see it mirrored.
    let expected = if routing {
        (conn.source_device_id(), conn.dest_device_id())
    } else {
        (conn.dest_device_id(), conn.source_device_id())
    };
    if (route.source_device_id, route.dest_device_id) != expected {
        return Err(misaddressed);
    }
    Ok(Admission::Bound)
}

/// Process and send one message.
///
/// # Errors
///
/// Returns `ChannelError::Closed` on a closed connection, `FrameError::Oversize`
/// if the plaintext does not fit the header's length field, cipher errors, or
/// the endpoint's I/O error.
pub fn dispatch<E: Endpoint>(
    conn: &mut Connection<E>,
    opts: &SessionOptions,
    plaintext: &[u8],
) -> Result<(), Error> {
    let inflated_len = u32::try_from(plaintext.len()).map_err(|_| FrameError::Oversize {
        len: plaintext.len(),
        max: u32::MAX as usize,
    })?;

    let (cipher, compression) = match opts.msg_type {
        MessageKind::Data => (Some(opts.effective_cipher()), opts.compress_type),
        MessageKind::Auth | MessageKind::Negotiate => (Some(opts.effective_cipher()), None),
        MessageKind::Init | MessageKind::Alert => (None, None),
    };

    let mut header = MessageHeader {
        kind: opts.msg_type,
        cipher,
        compression,
        session_type: opts.session_type,
        body_len: 0,
        inflated_len,
    };

    let route = conn.route();
    let compressed = compression.map(|c| c.compressor().compress(plaintext));
    let inner = compressed.as_deref().unwrap_or(plaintext);

    let body = match cipher {
        Some(kind) => kind.encrypt(&opts.key, inner, &header.aad(route.session_id))?,
        None => inner.to_vec(),
    };
    header.body_len = u32::try_from(body.len()).map_err(|_| FrameError::Oversize {
        len: body.len(),
        max: u32::MAX as usize,
    })?;

    let count = message::write_message(conn.endpoint_mut()?, &route, &header, &body)?;
    conn.record_out(count);

    tracing::trace!(
        kind = ?header.kind,
        cipher = ?cipher.map(CipherKind::name),
        compression = ?compression.map(CompressionKind::name),
        plain = plaintext.len(),
        body = body.len(),
        "dispatched"
    );
    Ok(())
}

/// Read and open one message. The returned body is plaintext.
///
/// `max_plain` bounds the declared plaintext length; the sealed body is
/// bounded accordingly before anything is allocated.
///
/// A connection with no session is bound to the peer once the first
/// sealed handshake message opens.
///
/// # Errors
///
/// - frame errors from reassembly, or `FrameError::Oversize` if the declared
///   plaintext exceeds `max_plain`
/// - `ChannelError::UnexpectedMessage` if the header's algorithms do not fit
///   its kind
/// - `ChannelError::SessionMismatch` / `Misaddressed` if the message is not
///   addressed to this connection
/// - cipher and compression errors from opening the body
pub fn receive<E: Endpoint>(conn: &mut Connection<E>, max_plain: usize) -> Result<Message, Error> {
    let (mut msg, count) = message::read_message(conn.endpoint_mut()?, max_body_len(max_plain))?;
    conn.record_in(count);

    let header = msg.header;
    let inflated_len = header.inflated_len as usize;
    if inflated_len > max_plain {
        return Err(FrameError::Oversize {
            len: inflated_len,
            max: max_plain,
        }
        .into());
    }

    let sealed = header.kind.is_sealed();
    if sealed != header.cipher.is_some() {
        return Err(ChannelError::UnexpectedMessage(format!(
            "{:?} message with cipher {:?}",
            header.kind, header.cipher
        ))
        .into());
    }
    if header.compression.is_some() && header.kind != MessageKind::Data {
        return Err(ChannelError::UnexpectedMessage(format!(
            "{:?} message with compression",
            header.kind
        ))
        .into());
    }

    let admission = admit(conn, header.kind, &msg.route)?;
    let session = match admission {
        Admission::Adopt => msg.route.session_id,
        Admission::Bound | Admission::Unscoped => conn.session_id(),
    };

    let opened = match header.cipher {
        Some(kind) => kind.decrypt(conn.key(), &msg.body, &header.aad(session))?,
        None => std::mem::take(&mut msg.body),
    };

    let plain = match header.compression {
        Some(kind) => kind.compressor().decompress(&opened, inflated_len)?,
        None => opened,
    };

    if plain.len() != inflated_len {
        return Err(FrameError::MalformedBody(format!(
            "inflated length {} does not match declared {inflated_len}",
            plain.len()
        ))
        .into());
    }

    if admission == Admission::Adopt {
        conn.bind_session(&msg.route);
        tracing::debug!(
            session = conn.session_id(),
            peer = conn.dest_device_id(),
            "session learned from peer"
        );
    }

    msg.body = plain;
    Ok(msg)
}
