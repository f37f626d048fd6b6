//! Authentication sequencer.
//!
//! ```text
//! user                                   host
//!  │ ── Auth{username, password, nonce} ──▶ │  sealed, baseline cipher
//!  │                                        │  verify against CredentialStore
//!  │ ◀──────── Auth{nonce} ──────────────── │  sealed, echoes the nonce
//!  │ ◀──────── Alert{reason} ───────────── │  clear, on rejection
//! ```
//!
//! The nonce echo proves the accept came from a holder of the session key
//! and answers this request, not an earlier one.

use serde::{Deserialize, Serialize};
use sidp_crypto::constant_time::verify_16;
use sidp_crypto::random::random_16;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{
    Reply, is_timeout, is_transport, recv_handshake, send_alert, send_handshake,
    with_handshake_timeout,
};
use crate::connection::Connection;
use crate::credentials::CredentialStore;
use crate::endpoint::Endpoint;
use crate::error::{AuthError, Error};
use crate::flags::Status;
use crate::message::{AlertReason, MessageKind};

/// Longest accepted user name, in bytes.
pub const MAX_USERNAME_LEN: usize = 128;

/// Longest accepted password, in bytes.
pub const MAX_PASSWORD_LEN: usize = 256;

/// Authentication progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// Not started
    Unauthenticated,
    /// Exchange in progress
    Authenticating,
    /// Credentials accepted
    Authenticated,
    /// Exchange failed; the connection is poisoned
    Failed,
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct AuthRequest {
    username: String,
    password: String,
    nonce: [u8; 16],
}

#[derive(Serialize, Deserialize)]
struct AuthAccept {
    nonce: [u8; 16],
}

fn check_lengths(username: &str, password: &str) -> Result<(), AuthError> {
    if username.is_empty() || username.len() > MAX_USERNAME_LEN {
        return Err(AuthError::ProtocolViolation(format!(
            "user name must be 1 to {MAX_USERNAME_LEN} bytes"
        )));
    }
    if password.len() > MAX_PASSWORD_LEN {
        return Err(AuthError::ProtocolViolation(format!(
            "password longer than {MAX_PASSWORD_LEN} bytes"
        )));
    }
    Ok(())
}

fn begin<E: Endpoint>(conn: &mut Connection<E>) -> Result<(), Error> {
    conn.ensure_usable()?;
    if conn.auth_state() != AuthState::Unauthenticated {
        return Err(AuthError::ProtocolViolation("authentication already attempted".into()).into());
    }
    conn.set_auth_state(AuthState::Authenticating);
    Ok(())
}

fn finish<E: Endpoint>(
    conn: &mut Connection<E>,
    result: Result<String, Error>,
) -> Result<(), Error> {
    match result {
        Ok(username) => {
            tracing::debug!(username = %username, session = conn.session_id(), "authenticated");
            conn.set_username(username);
            conn.set_auth_state(AuthState::Authenticated);
            conn.mark(Status::Authenticated);
            Ok(())
        }
        Err(e) => {
            conn.set_auth_state(AuthState::Failed);
            tracing::warn!(session = conn.session_id(), error = %e, "authentication failed");
            Err(match e {
                Error::Auth(_) => e,
                e if is_timeout(&e) => AuthError::Timeout.into(),
                e if is_transport(&e) => e,
                e => AuthError::ProtocolViolation(e.to_string()).into(),
            })
        }
    }
}

/// Authenticate as the initiating side.
///
/// On success the connection is `Authenticated` and remembers `username`.
///
/// # Errors
///
/// - `AuthError::CredentialMismatch` if the host rejects the credentials
/// - `AuthError::ProtocolViolation` for malformed or repeated exchanges, a
///   wrong nonce echo, or over-long credentials
/// - `AuthError::Timeout` if the host does not answer in time
/// - the endpoint's I/O error
pub fn authenticate_user<E: Endpoint>(
    conn: &mut Connection<E>,
    username: &str,
    password: &str,
) -> Result<(), Error> {
    check_lengths(username, password)?;
    begin(conn)?;

    let result = with_handshake_timeout(conn, |conn| {
        let nonce = random_16()?;
        let request = AuthRequest {
            username: username.to_owned(),
            password: password.to_owned(),
            nonce,
        };
        send_handshake(conn, MessageKind::Auth, &request)?;

        match recv_handshake::<_, AuthAccept>(conn, MessageKind::Auth)? {
            Reply::Body(accept) if verify_16(&accept.nonce, &nonce) => Ok(username.to_owned()),
            Reply::Body(_) => Err(AuthError::ProtocolViolation("nonce echo mismatch".into()).into()),
            Reply::Alert(AlertReason::CredentialMismatch) => Err(AuthError::CredentialMismatch.into()),
            Reply::Alert(reason) => {
                Err(AuthError::ProtocolViolation(format!("peer alert: {reason}")).into())
            }
        }
    });
    finish(conn, result)
}

/// Authenticate the peer as the responding side.
///
/// A request that does not open under the session key is treated as a
/// credential mismatch: the peer does not hold the pre-shared key.
///
/// # Errors
///
/// - `AuthError::CredentialMismatch` for unknown users, wrong passwords and
///   undecryptable requests
/// - `AuthError::ProtocolViolation` for malformed or repeated exchanges
/// - `AuthError::Timeout` if no request arrives in time
/// - the endpoint's I/O error
pub fn authenticate_host<E: Endpoint>(
    conn: &mut Connection<E>,
    store: &dyn CredentialStore,
) -> Result<(), Error> {
    begin(conn)?;

    let result = with_handshake_timeout(conn, |conn| {
        let request: AuthRequest = match recv_handshake(conn, MessageKind::Auth) {
            Ok(Reply::Body(request)) => request,
            Ok(Reply::Alert(reason)) => {
                return Err(AuthError::ProtocolViolation(format!("peer alert: {reason}")).into());
            }
            Err(Error::Cipher(_)) => {
                send_alert(conn, AlertReason::CredentialMismatch);
                return Err(AuthError::CredentialMismatch.into());
            }
            Err(e) => {
                if !is_transport(&e) {
                    send_alert(conn, AlertReason::ProtocolViolation);
                }
                return Err(e);
            }
        };

        if let Err(e) = check_lengths(&request.username, &request.password) {
            send_alert(conn, AlertReason::ProtocolViolation);
            return Err(e.into());
        }

        if !store.verify(&request.username, request.password.as_bytes()) {
            send_alert(conn, AlertReason::CredentialMismatch);
            return Err(AuthError::CredentialMismatch.into());
        }

        send_handshake(
            conn,
            MessageKind::Auth,
            &AuthAccept {
                nonce: request.nonce,
            },
        )?;
        Ok(request.username.clone())
    });
    finish(conn, result)
}
