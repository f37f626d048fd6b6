//! Init sequence: agree on device and session identifiers.
//!
//! The user sends its connection type and ids in clear. The host adopts the
//! session id and the peer's device id (both device ids on a routing
//! connection) and echoes its view back. The user accepts the echo when,
//! for normal and persistent connections, source and destination are
//! swapped, and for routing connections, they are identical.

use serde::{Deserialize, Serialize};

use super::{
    Reply, is_timeout, is_transport, recv_handshake, send_alert, send_handshake,
    with_handshake_timeout,
};
use crate::connection::{Connection, ConnectionType};
use crate::endpoint::Endpoint;
use crate::error::{Error, InitError};
use crate::flags::Status;
use crate::message::{AlertReason, MessageKind};

/// Init sequence progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    /// Not run
    Idle,
    /// Completed
    Initiated,
    /// Failed; the connection is poisoned
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct InitData {
    conn_type: u8,
    source: u32,
    dest: u32,
    session: u32,
}

fn begin<E: Endpoint>(conn: &Connection<E>) -> Result<(), Error> {
    conn.ensure_usable()?;
    if conn.init_state() != InitState::Idle {
        return Err(InitError::ProtocolViolation("init sequence already run".into()).into());
    }
    Ok(())
}

fn finish<E: Endpoint>(conn: &mut Connection<E>, result: Result<(), Error>) -> Result<(), Error> {
    match result {
        Ok(()) => {
            conn.set_init_state(InitState::Initiated);
            conn.mark(Status::Initiated);
            tracing::debug!(
                conn_type = ?conn.connection_type(),
                source = conn.source_device_id(),
                dest = conn.dest_device_id(),
                session = conn.session_id(),
                "init sequence complete"
            );
            Ok(())
        }
        Err(e) => {
            conn.set_init_state(InitState::Failed);
            tracing::warn!(error = %e, "init sequence failed");
            Err(match e {
                Error::Init(_) => e,
                e if is_timeout(&e) => InitError::Timeout.into(),
                e if is_transport(&e) => e,
                e => InitError::ProtocolViolation(e.to_string()).into(),
            })
        }
    }
}

fn check(field: &'static str, expected: u32, actual: u32) -> Result<(), InitError> {
    if expected != actual {
        return Err(InitError::IdMismatch {
            field,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Run the init sequence as the initiating side.
///
/// # Errors
///
/// Returns `InitError::IdMismatch` if the echo does not match the
/// connection type's rule, `InitError::ProtocolViolation` for malformed or
/// repeated exchanges, `InitError::Timeout` if the host does not answer in
/// time, or the endpoint's I/O error.
pub fn init_user<E: Endpoint>(conn: &mut Connection<E>) -> Result<(), Error> {
    begin(conn)?;
    let result = with_handshake_timeout(conn, |conn| {
        let conn_type = conn.connection_type();
        let request = InitData {
            conn_type: conn_type.code(),
            source: conn.source_device_id(),
            dest: conn.dest_device_id(),
            session: conn.session_id(),
        };
        send_handshake(conn, MessageKind::Init, &request)?;

        let echo: InitData = match recv_handshake(conn, MessageKind::Init)? {
            Reply::Body(echo) => echo,
            Reply::Alert(reason) => {
                return Err(InitError::ProtocolViolation(format!("peer alert: {reason}")).into());
            }
        };

        check("session id", request.session, echo.session)?;
        if echo.conn_type != request.conn_type {
            return Err(InitError::ProtocolViolation(format!(
                "connection type changed from {} to {}",
                request.conn_type, echo.conn_type
            ))
            .into());
        }

        match conn_type {
            ConnectionType::Normal | ConnectionType::Persistent => {
                check("source device id", request.source, echo.dest)?;
                check("destination device id", request.dest, echo.source)?;
            }
            ConnectionType::Routing => {
                check("source device id", request.source, echo.source)?;
                check("destination device id", request.dest, echo.dest)?;
            }
        }
        Ok(())
    });
    finish(conn, result)
}

/// Run the init sequence as the responding side.
///
/// The host keeps its own source device id on normal and persistent
/// connections and adopts both ids on routing connections. The session id
/// is always adopted from the user.
///
/// # Errors
///
/// Returns `InitError::ProtocolViolation` for malformed, unknown-type or
/// repeated exchanges, `InitError::Timeout` if no request arrives in time,
/// or the endpoint's I/O error.
pub fn init_host<E: Endpoint>(conn: &mut Connection<E>) -> Result<(), Error> {
    begin(conn)?;
    let result = with_handshake_timeout(conn, |conn| {
        let request: InitData = match recv_handshake(conn, MessageKind::Init) {
            Ok(Reply::Body(request)) => request,
            Ok(Reply::Alert(reason)) => {
                return Err(InitError::ProtocolViolation(format!("peer alert: {reason}")).into());
            }
            Err(e) => {
                if !is_transport(&e) {
                    send_alert(conn, AlertReason::ProtocolViolation);
                }
                return Err(e);
            }
        };

        let Some(conn_type) = ConnectionType::from_code(request.conn_type) else {
            send_alert(conn, AlertReason::ProtocolViolation);
            return Err(InitError::ProtocolViolation(format!(
                "unknown connection type {}",
                request.conn_type
            ))
            .into());
        };

        let (source, dest) = match conn_type {
            ConnectionType::Normal | ConnectionType::Persistent => {
                (conn.source_device_id(), request.source)
            }
            ConnectionType::Routing => (request.source, request.dest),
        };
        conn.adopt_identity(conn_type, source, dest, request.session);

        let echo = InitData {
            conn_type: conn_type.code(),
            source,
            dest,
            session: request.session,
        };
        send_handshake(conn, MessageKind::Init, &echo)
    });
    finish(conn, result)
}
