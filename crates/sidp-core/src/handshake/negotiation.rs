//! Capability negotiation.
//!
//! The user offers its supported set; the host intersects it with its own,
//! picks one cipher and one compression by [`Feature::CIPHERS`] and
//! [`Feature::COMPRESSIONS`] order and returns the selection. Both sides
//! write the selection once. There is no partial outcome: a missing cipher
//! or compression fails the whole exchange.

use serde::{Deserialize, Serialize};

use super::{
    Reply, is_timeout, is_transport, recv_handshake, send_alert, send_handshake,
    with_handshake_timeout,
};
use crate::connection::Connection;
use crate::endpoint::Endpoint;
use crate::error::{Error, NegotiationError};
use crate::flags::{Feature, FlagSet, Status};
use crate::message::{AlertReason, MessageKind};

/// Negotiation progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// Not started
    NotNegotiated,
    /// Exchange in progress
    Negotiating,
    /// Selection recorded
    Negotiated,
    /// Exchange failed; the connection is poisoned
    Failed,
}

#[derive(Debug, Serialize, Deserialize)]
struct NegotiateOffer {
    supported: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct NegotiateSelection {
    selected: u32,
}

/// Pick the negotiated set from two supported sets.
///
/// # Errors
///
/// Returns `NoCommonCipher` or `NoCommonCompression` when the intersection
/// lacks that category, or `ProtocolViolation` if either side does not
/// support the default encapsulation.
pub fn select(
    local: FlagSet<Feature>,
    remote: FlagSet<Feature>,
) -> Result<FlagSet<Feature>, NegotiationError> {
    let common = local.intersection(&remote);

    let cipher = Feature::CIPHERS
        .into_iter()
        .find(|f| common.contains(*f))
        .ok_or(NegotiationError::NoCommonCipher)?;
    let compression = Feature::COMPRESSIONS
        .into_iter()
        .find(|f| common.contains(*f))
        .ok_or(NegotiationError::NoCommonCompression)?;
    if !common.contains(Feature::EncapDefault) {
        return Err(NegotiationError::ProtocolViolation(
            "default encapsulation not supported".into(),
        ));
    }

    Ok(FlagSet::empty()
        .with(cipher)
        .with(compression)
        .with(Feature::EncapDefault))
}

fn validate_selection(
    local: FlagSet<Feature>,
    bits: u32,
) -> Result<FlagSet<Feature>, NegotiationError> {
    let selected = FlagSet::<Feature>::from_bits_truncate(bits);
    if selected.bits() != bits {
        return Err(NegotiationError::ProtocolViolation(format!(
            "selection {bits:#x} has unknown bits"
        )));
    }
    if !local.is_superset(&selected) {
        return Err(NegotiationError::ProtocolViolation(format!(
            "selection {selected:?} exceeds local support {local:?}"
        )));
    }

    let ciphers = selected.iter().filter(|f| f.is_cipher()).count();
    let compressions = selected.iter().filter(|f| f.is_compression()).count();
    if ciphers != 1 || compressions != 1 || !selected.contains(Feature::EncapDefault) {
        return Err(NegotiationError::ProtocolViolation(format!(
            "selection {selected:?} is not one cipher, one compression and the default encapsulation"
        )));
    }
    Ok(selected)
}

fn alert_for(err: &NegotiationError) -> AlertReason {
    match err {
        NegotiationError::NoCommonCipher => AlertReason::NoCommonCipher,
        NegotiationError::NoCommonCompression => AlertReason::NoCommonCompression,
        NegotiationError::AlreadyNegotiated => AlertReason::AlreadyNegotiated,
        NegotiationError::ProtocolViolation(_) | NegotiationError::Timeout => {
            AlertReason::ProtocolViolation
        }
    }
}

fn error_for(reason: AlertReason) -> NegotiationError {
    match reason {
        AlertReason::NoCommonCipher => NegotiationError::NoCommonCipher,
        AlertReason::NoCommonCompression => NegotiationError::NoCommonCompression,
        AlertReason::AlreadyNegotiated => NegotiationError::AlreadyNegotiated,
        reason => NegotiationError::ProtocolViolation(format!("peer alert: {reason}")),
    }
}

/// Returns the state to restore if the peer answers `AlreadyNegotiated`.
///
/// A connection that is already negotiated, whether by a previous run or by
/// static [`SessionOptions`](crate::SessionOptions), is refused here without
/// any I/O and stays usable.
fn begin<E: Endpoint>(conn: &mut Connection<E>) -> Result<NegotiationState, Error> {
    conn.ensure_usable()?;
    let previous = conn.negotiation_state();
    if previous == NegotiationState::Negotiated {
        tracing::debug!(session = conn.session_id(), "negotiation skipped: already negotiated");
        return Err(NegotiationError::AlreadyNegotiated.into());
    }
    conn.set_negotiation_state(NegotiationState::Negotiating);
    Ok(previous)
}

fn finish<E: Endpoint>(
    conn: &mut Connection<E>,
    previous: NegotiationState,
    result: Result<FlagSet<Feature>, Error>,
) -> Result<(), Error> {
    match result {
        Ok(selected) => {
            conn.set_negotiated(selected);
            conn.set_negotiation_state(NegotiationState::Negotiated);
            conn.mark(Status::Negotiated);
            tracing::debug!(
                session = conn.session_id(),
                cipher = conn.data_cipher().name(),
                compression = ?conn.data_compression().map(|c| c.name()),
                "negotiated"
            );
            Ok(())
        }
        Err(Error::Negotiation(NegotiationError::AlreadyNegotiated)) => {
            conn.set_negotiation_state(previous);
            tracing::debug!(session = conn.session_id(), "negotiation refused: already negotiated");
            Err(NegotiationError::AlreadyNegotiated.into())
        }
        Err(e) => {
            conn.set_negotiation_state(NegotiationState::Failed);
            tracing::warn!(session = conn.session_id(), error = %e, "negotiation failed");
            Err(match e {
                Error::Negotiation(_) => e,
                e if is_timeout(&e) => NegotiationError::Timeout.into(),
                e if is_transport(&e) => e,
                e => NegotiationError::ProtocolViolation(e.to_string()).into(),
            })
        }
    }
}

/// Negotiate as the initiating side.
///
/// A connection that is already negotiated, whether by a previous run or by
/// static [`SessionOptions`](crate::SessionOptions), returns
/// `AlreadyNegotiated` without any I/O and stays usable.
///
/// # Errors
///
/// - `NoCommonCipher` / `NoCommonCompression` when the host finds no overlap
/// - `ProtocolViolation` for malformed, out-of-sequence or invalid selections
/// - `AlreadyNegotiated` as above, or when the host answers with that alert
/// - `Timeout` if the host does not answer in time
/// - the endpoint's I/O error
pub fn negotiate_user<E: Endpoint>(conn: &mut Connection<E>) -> Result<(), Error> {
    let previous = begin(conn)?;

    let result = with_handshake_timeout(conn, |conn| {
        let local = conn.supported();
        send_handshake(
            conn,
            MessageKind::Negotiate,
            &NegotiateOffer {
                supported: local.bits(),
            },
        )?;

        match recv_handshake::<_, NegotiateSelection>(conn, MessageKind::Negotiate)? {
            Reply::Body(selection) => Ok(validate_selection(local, selection.selected)?),
            Reply::Alert(reason) => Err(error_for(reason).into()),
        }
    });
    finish(conn, previous, result)
}

/// Negotiate as the responding side.
///
/// A connection that is already negotiated, whether by a previous run or by
/// static [`SessionOptions`](crate::SessionOptions), returns
/// `AlreadyNegotiated` without waiting for an offer and stays usable.
///
/// # Errors
///
/// - `NoCommonCipher` / `NoCommonCompression` when the offer does not
///   overlap local support; the user is told by alert
/// - `ProtocolViolation` for malformed or out-of-sequence offers
/// - `AlreadyNegotiated` as above
/// - `Timeout` if no offer arrives in time
/// - the endpoint's I/O error
pub fn negotiate_host<E: Endpoint>(conn: &mut Connection<E>) -> Result<(), Error> {
    let previous = begin(conn)?;

    let result = with_handshake_timeout(conn, |conn| {
        let offer: NegotiateOffer = match recv_handshake(conn, MessageKind::Negotiate) {
            Ok(Reply::Body(offer)) => offer,
            Ok(Reply::Alert(reason)) => return Err(error_for(reason).into()),
            Err(e) => {
                if !is_transport(&e) {
                    send_alert(conn, AlertReason::ProtocolViolation);
                }
                return Err(e);
            }
        };

        let remote = FlagSet::from_bits_truncate(offer.supported);
        let selected = match select(conn.supported(), remote) {
            Ok(selected) => selected,
            Err(e) => {
                send_alert(conn, alert_for(&e));
                return Err(e.into());
            }
        };

        send_handshake(
            conn,
            MessageKind::Negotiate,
            &NegotiateSelection {
                selected: selected.bits(),
            },
        )?;
        Ok(selected)
    });
    finish(conn, previous, result)
}

#[cfg(test)]
mod tests {
    use std::thread;

    use sidp_crypto::{CipherKind, SessionKey};

    use super::*;
    use crate::compression::CompressionKind;
    use crate::endpoint::MemoryEndpoint;
    use crate::message::SessionType;
    use crate::options::SessionOptions;

    fn set(features: &[Feature]) -> FlagSet<Feature> {
        features.iter().copied().collect()
    }

    fn pair(
        user: &[Feature],
        host: &[Feature],
    ) -> (Connection<MemoryEndpoint>, Connection<MemoryEndpoint>) {
        let (a, b) = MemoryEndpoint::pair();
        let key = SessionKey::new([3; 32]);
        let mut u = Connection::init(a, 1, 2, 77, key.clone());
        let mut h = Connection::init(b, 2, 1, 77, key);
        u.set_supported(set(user));
        h.set_supported(set(host));
        (u, h)
    }

    fn run(
        mut user: Connection<MemoryEndpoint>,
        mut host: Connection<MemoryEndpoint>,
    ) -> (
        Result<(), Error>,
        Result<(), Error>,
        Connection<MemoryEndpoint>,
        Connection<MemoryEndpoint>,
    ) {
        let h = thread::spawn(move || {
            let r = negotiate_host(&mut host);
            (r, host)
        });
        let ur = negotiate_user(&mut user);
        let (hr, host) = h.join().unwrap();
        (ur, hr, user, host)
    }

    #[test]
    fn test_select_prefers_aes_and_zlib() {
        let all = FlagSet::all();
        let selected = select(all, all).unwrap();
        assert_eq!(
            selected,
            set(&[Feature::CipherAes256, Feature::CompressZlib, Feature::EncapDefault])
        );
    }

    #[test]
    fn test_select_falls_back() {
        let local = set(&[
            Feature::CipherXSalsa20,
            Feature::CipherAes256,
            Feature::CompressLzo,
            Feature::EncapDefault,
        ]);
        let remote = set(&[
            Feature::CipherXSalsa20,
            Feature::CompressLzo,
            Feature::CompressZlib,
            Feature::EncapDefault,
        ]);
        assert_eq!(
            select(local, remote).unwrap(),
            set(&[Feature::CipherXSalsa20, Feature::CompressLzo, Feature::EncapDefault])
        );
    }

    #[test]
    fn test_select_disjoint() {
        let a = set(&[Feature::CipherAes256, Feature::CompressZlib, Feature::EncapDefault]);
        let b = set(&[Feature::CipherXSalsa20, Feature::CompressZlib, Feature::EncapDefault]);
        assert!(matches!(select(a, b), Err(NegotiationError::NoCommonCipher)));

        let c = set(&[Feature::CipherAes256, Feature::CompressLzo, Feature::EncapDefault]);
        assert!(matches!(select(a, c), Err(NegotiationError::NoCommonCompression)));
    }

    #[test]
    fn test_validate_selection() {
        let local = FlagSet::all();
        let good = set(&[Feature::CipherAes256, Feature::CompressLzo, Feature::EncapDefault]);
        assert_eq!(validate_selection(local, good.bits()).unwrap(), good);

        // Two ciphers.
        let two = good.with(Feature::CipherXSalsa20);
        assert!(validate_selection(local, two.bits()).is_err());
        // Unknown bit.
        assert!(validate_selection(local, good.bits() | 1 << 20).is_err());
        // Not locally supported.
        let narrow = set(&[Feature::CipherXSalsa20, Feature::CompressLzo, Feature::EncapDefault]);
        assert!(validate_selection(narrow, good.bits()).is_err());
    }

    #[test]
    fn test_full_negotiation() {
        let (user, host) = pair(
            &[Feature::CipherAes256, Feature::CipherXSalsa20, Feature::CompressLzo],
            &[Feature::CipherXSalsa20, Feature::CompressLzo, Feature::CompressZlib],
        );
        let (ur, hr, user, host) = run(user, host);
        ur.unwrap();
        hr.unwrap();

        for conn in [&user, &host] {
            assert!(conn.has_status(Status::Negotiated));
            assert_eq!(conn.negotiation_state(), NegotiationState::Negotiated);
            assert_eq!(conn.data_cipher(), CipherKind::XSalsa20);
            assert_eq!(conn.data_compression(), Some(CompressionKind::Lzo));
        }
        assert_eq!(user.negotiated(), host.negotiated());
    }

    #[test]
    fn test_no_common_cipher_reported_on_both_sides() {
        let (user, host) = pair(
            &[Feature::CipherAes256, Feature::CompressZlib],
            &[Feature::CipherXSalsa20, Feature::CompressZlib],
        );
        let (ur, hr, user, host) = run(user, host);
        assert!(matches!(ur, Err(Error::Negotiation(NegotiationError::NoCommonCipher))));
        assert!(matches!(hr, Err(Error::Negotiation(NegotiationError::NoCommonCipher))));
        assert!(user.is_poisoned());
        assert!(host.is_poisoned());
        assert!(user.negotiated().is_empty());
    }

    #[test]
    fn test_no_common_compression() {
        let (user, host) = pair(
            &[Feature::CipherAes256, Feature::CompressLzo],
            &[Feature::CipherAes256, Feature::CompressZlib],
        );
        let (ur, hr, ..) = run(user, host);
        assert!(matches!(ur, Err(Error::Negotiation(NegotiationError::NoCommonCompression))));
        assert!(matches!(hr, Err(Error::Negotiation(NegotiationError::NoCommonCompression))));
    }

    #[test]
    fn test_user_already_negotiated_no_io() {
        let (a, b) = MemoryEndpoint::pair();
        let opts = SessionOptions::new(
            SessionType::Default,
            Some(CompressionKind::Zlib),
            Some(CipherKind::Aes256),
            MessageKind::Data,
            SessionKey::new([3; 32]),
        );
        let mut user = Connection::from_options(a, 1, 2, 77, &opts);
        let mut host = Connection::init(b, 2, 1, 77, SessionKey::new([3; 32]));

        assert!(matches!(
            negotiate_user(&mut user),
            Err(Error::Negotiation(NegotiationError::AlreadyNegotiated))
        ));
        assert!(!user.is_poisoned());
        assert!(!host.endpoint_mut().unwrap().has_pending());
    }

    #[test]
    fn test_pinned_both_sides_no_io() {
        let (a, b) = MemoryEndpoint::pair();
        let opts = SessionOptions::new(
            SessionType::Default,
            Some(CompressionKind::Lzo),
            Some(CipherKind::XSalsa20),
            MessageKind::Data,
            SessionKey::new([3; 32]),
        );
        let config = crate::ChannelConfig {
            handshake_timeout_ms: 50,
            ..Default::default()
        };
        let mut user = Connection::from_options(a, 1, 2, 77, &opts)
            .with_config(config)
            .unwrap();
        let mut host = Connection::from_options(b, 2, 1, 77, &opts)
            .with_config(config)
            .unwrap();

        assert!(matches!(
            negotiate_user(&mut user),
            Err(Error::Negotiation(NegotiationError::AlreadyNegotiated))
        ));
        assert!(matches!(
            negotiate_host(&mut host),
            Err(Error::Negotiation(NegotiationError::AlreadyNegotiated))
        ));

        for conn in [&mut user, &mut host] {
            assert!(!conn.is_poisoned());
            assert_eq!(conn.negotiation_state(), NegotiationState::Negotiated);
            assert!(conn.has_status(Status::Negotiated));
            assert_eq!(conn.data_cipher(), CipherKind::XSalsa20);
            assert!(!conn.endpoint_mut().unwrap().has_pending());
        }
    }

    #[test]
    fn test_already_negotiated_alert_restores_state() {
        let (mut user, mut host) = pair(&[Feature::CipherAes256, Feature::CompressZlib], &[]);
        let h = thread::spawn(move || {
            let offer = recv_handshake::<_, NegotiateOffer>(&mut host, MessageKind::Negotiate);
            assert!(matches!(offer, Ok(Reply::Body(_))));
            send_alert(&mut host, AlertReason::AlreadyNegotiated);
            host
        });
        let ur = negotiate_user(&mut user);
        h.join().unwrap();

        assert!(matches!(ur, Err(Error::Negotiation(NegotiationError::AlreadyNegotiated))));
        assert!(!user.is_poisoned());
        assert_eq!(user.negotiation_state(), NegotiationState::NotNegotiated);
        assert!(user.negotiated().is_empty());
    }

    #[test]
    fn test_negotiation_timeout() {
        let (user, _host) = pair(&[Feature::CipherAes256, Feature::CompressZlib], &[]);
        let mut user = user
            .with_config(crate::ChannelConfig {
                handshake_timeout_ms: 20,
                ..Default::default()
            })
            .unwrap();
        assert!(matches!(
            negotiate_user(&mut user),
            Err(Error::Negotiation(NegotiationError::Timeout))
        ));
        assert!(user.is_poisoned());
    }
}
