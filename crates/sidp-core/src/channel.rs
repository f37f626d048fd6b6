//! Data channel: authenticated send and receive of application messages.

use crate::chain;
use crate::connection::Connection;
use crate::endpoint::Endpoint;
use crate::error::{ChannelError, Error, FrameError};
use crate::flags::Status;
use crate::message::{AlertReason, MessageKind};

fn ensure_authenticated<E: Endpoint>(conn: &Connection<E>) -> Result<(), ChannelError> {
    conn.ensure_usable()?;
    if !conn.has_status(Status::Authenticated) {
        return Err(ChannelError::NotAuthenticated);
    }
    Ok(())
}

/// Frame errors with a channel-level meaning are reported as such.
fn map_frame(err: Error) -> Error {
    match err {
        Error::Frame(FrameError::Truncated { .. }) => ChannelError::Truncated.into(),
        Error::Frame(FrameError::SessionMismatch { expected, actual }) => {
            ChannelError::SessionMismatch { expected, actual }.into()
        }
        e => e,
    }
}

/// Send one message.
///
/// The plaintext is compressed if a compression is negotiated, sealed with
/// the negotiated cipher (the baseline cipher otherwise) and written as one
/// or more packets.
///
/// # Errors
///
/// - `ChannelError::NotAuthenticated` before authentication
/// - `ChannelError::MessageTooLarge` above `max_message_len`
/// - `ChannelError::Closed` / `Poisoned` on an unusable connection
/// - cipher errors and the endpoint's I/O error
pub fn send<E: Endpoint>(conn: &mut Connection<E>, plaintext: &[u8]) -> Result<(), Error> {
    ensure_authenticated(conn)?;

    let max = conn.config().max_message_len;
    if plaintext.len() > max {
        return Err(ChannelError::MessageTooLarge {
            len: plaintext.len(),
            max,
        }
        .into());
    }

    let opts = conn.message_options(MessageKind::Data);
    chain::dispatch(conn, &opts, plaintext)
}

/// Receive one message.
///
/// Blocks until a whole message has arrived, or until the configured read
/// timeout expires.
///
/// # Errors
///
/// - `ChannelError::NotAuthenticated` before authentication
/// - `ChannelError::Truncated` if the endpoint closes mid-message
/// - `ChannelError::SessionMismatch` if the message, or a continuation
///   packet, belongs to another session
/// - `ChannelError::Misaddressed` if its device ids do not match this link
/// - `ChannelError::UnexpectedMessage` for non-data messages or algorithms
///   other than the negotiated ones
/// - `ChannelError::PeerAlert` if the peer sent an alert
/// - frame, cipher and compression errors, and the endpoint's I/O error
pub fn recv<E: Endpoint>(conn: &mut Connection<E>) -> Result<Vec<u8>, Error> {
    ensure_authenticated(conn)?;

    let max = conn.config().max_message_len;
    let msg = chain::receive(conn, max).map_err(map_frame)?;
    let header = msg.header;

    match header.kind {
        MessageKind::Data => {}
        MessageKind::Alert => {
            let reason = AlertReason::from_code(msg.body.first().copied().unwrap_or(0));
            return Err(ChannelError::PeerAlert(reason).into());
        }
        kind => {
            return Err(ChannelError::UnexpectedMessage(format!(
                "{kind:?} message on the data channel"
            ))
            .into());
        }
    }

    let cipher = conn.data_cipher();
    if header.cipher != Some(cipher) {
        return Err(ChannelError::UnexpectedMessage(format!(
            "data sealed with {:?}, expected {}",
            header.cipher,
            cipher.name()
        ))
        .into());
    }
    if header.compression != conn.data_compression() {
        return Err(ChannelError::UnexpectedMessage(format!(
            "data compressed with {:?}, expected {:?}",
            header.compression,
            conn.data_compression()
        ))
        .into());
    }

    Ok(msg.body)
}
