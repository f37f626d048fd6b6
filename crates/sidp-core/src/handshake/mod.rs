//! Handshake sequencers.
//!
//! Three optional, caller-ordered exchanges run before data flows:
//!
//! | Sequencer | User side | Host side | Sets |
//! |-----------|-----------|-----------|------|
//! | [`init`] | [`init_user`] | [`init_host`] | `Initiated` |
//! | [`auth`] | [`authenticate_user`] | [`authenticate_host`] | `Authenticated` |
//! | [`negotiation`] | [`negotiate_user`] | [`negotiate_host`] | `Negotiated` |
//!
//! Only authentication is required before the data channel opens. The
//! engine does not order the sequencers. The usual flow authenticates
//! before negotiating, which means credentials travel under the baseline
//! cipher (AES-256-GCM) and the pre-shared key, never under the negotiated
//! cipher. Negotiating first does not change that: handshake messages are
//! always sealed with the baseline cipher.
//!
//! Handshake bodies are bincode-encoded (big-endian, fixed-width integers,
//! bounded length). A host that rejects a handshake replies with a clear
//! alert carrying the reason, so the user side reports the same error. Any
//! failure leaves the connection poisoned.
//!
//! The host issues no challenge before authentication. A captured auth
//! request opens only under the same key and is only admitted on a
//! connection with the same session and device ids, so a replay cannot cross
//! sessions. Within one session it is indistinguishable from the original;
//! callers that need freshness must use a new session id per connection.

pub mod auth;
pub mod init;
pub mod negotiation;

pub use auth::{AuthState, authenticate_host, authenticate_user};
pub use init::{InitState, init_host, init_user};
pub use negotiation::{NegotiationState, negotiate_host, negotiate_user, select};

use std::io;

use bincode::Options;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sidp_crypto::CipherKind;
use zeroize::Zeroizing;

use crate::chain;
use crate::connection::Connection;
use crate::endpoint::Endpoint;
use crate::error::{ChannelError, Error, FrameError};
use crate::message::{AlertReason, MessageKind};

/// Largest handshake body, in bytes.
pub const HANDSHAKE_MAX_BODY: usize = 1024;

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
        .with_limit(HANDSHAKE_MAX_BODY as u64)
        .reject_trailing_bytes()
}

pub(crate) fn encode_body<T: Serialize>(value: &T) -> Result<Zeroizing<Vec<u8>>, FrameError> {
    codec()
        .serialize(value)
        .map(Zeroizing::new)
        .map_err(|e| FrameError::MalformedBody(e.to_string()))
}

pub(crate) fn decode_body<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, FrameError> {
    codec()
        .deserialize(bytes)
        .map_err(|e| FrameError::MalformedBody(e.to_string()))
}

/// A handshake reply: the expected body, or the peer's alert.
pub(crate) enum Reply<T> {
    Body(T),
    Alert(AlertReason),
}

pub(crate) fn send_handshake<E: Endpoint, T: Serialize>(
    conn: &mut Connection<E>,
    kind: MessageKind,
    value: &T,
) -> Result<(), Error> {
    let body = encode_body(value)?;
    let opts = conn.message_options(kind);
    chain::dispatch(conn, &opts, &body)
}

pub(crate) fn recv_handshake<E: Endpoint, T: DeserializeOwned>(
    conn: &mut Connection<E>,
    expected: MessageKind,
) -> Result<Reply<T>, Error> {
    let msg = chain::receive(conn, HANDSHAKE_MAX_BODY)?;
    let kind = msg.header.kind;
    let cipher = msg.header.cipher;
    let body = Zeroizing::new(msg.body);

    if kind == MessageKind::Alert {
        let reason = AlertReason::from_code(body.first().copied().unwrap_or(0));
        tracing::debug!(%reason, "received alert");
        return Ok(Reply::Alert(reason));
    }
    if kind != expected {
        return Err(ChannelError::UnexpectedMessage(format!(
            "expected {expected:?}, got {kind:?}"
        ))
        .into());
    }
    if kind.is_sealed() && cipher != Some(CipherKind::BASELINE) {
        return Err(ChannelError::UnexpectedMessage(format!(
            "handshake sealed with {cipher:?}"
        ))
        .into());
    }

    Ok(Reply::Body(decode_body(&body)?))
}

/// Best-effort alert; the handshake has already failed.
pub(crate) fn send_alert<E: Endpoint>(conn: &mut Connection<E>, reason: AlertReason) {
    let opts = conn.message_options(MessageKind::Alert);
    if let Err(e) = chain::dispatch(conn, &opts, &[reason.code()]) {
        tracing::debug!(%reason, error = %e, "failed to send alert");
    }
}

/// Run `f` with the handshake read timeout applied, then restore the data
/// read timeout.
pub(crate) fn with_handshake_timeout<E: Endpoint, T>(
    conn: &mut Connection<E>,
    f: impl FnOnce(&mut Connection<E>) -> Result<T, Error>,
) -> Result<T, Error> {
    let handshake = conn.config().handshake_timeout();
    let steady = conn.config().read_timeout();

    conn.set_read_timeout(handshake)?;
    let result = f(conn);
    let restored = conn.set_read_timeout(steady);

    let value = result?;
    restored?;
    Ok(value)
}

pub(crate) fn is_timeout(err: &Error) -> bool {
    matches!(
        err,
        Error::Io(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
    )
}

/// Errors that say nothing about the peer's conduct and pass through as-is.
pub(crate) fn is_transport(err: &Error) -> bool {
    matches!(err, Error::Io(_) | Error::Channel(ChannelError::Closed))
}
