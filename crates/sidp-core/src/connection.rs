//! Connection context.
//!
//! A [`Connection`] owns everything one device-to-device link needs: the
//! endpoint, device and session identifiers, the pre-shared key, the three
//! flag sets and per-sequencer state. It performs no I/O of its own apart
//! from shutting the endpoint down on [`close`](Connection::close); the
//! handshake and channel modules drive traffic through it.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sidp_crypto::{CipherKind, SessionKey};
use zeroize::Zeroize;

use crate::compression::CompressionKind;
use crate::config::ChannelConfig;
use crate::endpoint::Endpoint;
use crate::error::{ChannelError, Error};
use crate::flags::{Feature, FlagSet, Status};
use crate::handshake::{AuthState, InitState, NegotiationState};
use crate::message::{MessageKind, Route, SessionType, WireCount};
use crate::options::SessionOptions;

/// Session id of a connection that learns its session from the peer: the
/// init request, or else the first sealed handshake message it opens.
pub const UNASSIGNED_SESSION: u32 = 0;

/// How device ids relate across the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    /// Point to point; the peer sees our ids swapped
    #[default]
    Normal,
    /// Relayed; both ends carry the same source and destination ids
    Routing,
    /// Point to point, kept open across sessions
    Persistent,
}

impl ConnectionType {
    /// Wire code.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Normal => 1,
            Self::Routing => 2,
            Self::Persistent => 3,
        }
    }

    /// Parse a wire code.
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Normal),
            2 => Some(Self::Routing),
            3 => Some(Self::Persistent),
            _ => None,
        }
    }
}

/// Traffic counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionStats {
    /// Total bytes sent, including headers
    pub bytes_out: u64,
    /// Total bytes received, including headers
    pub bytes_in: u64,
    /// Total packets sent
    pub packets_out: u64,
    /// Total packets received
    pub packets_in: u64,
    /// Messages sent
    pub messages_out: u64,
    /// Messages received
    pub messages_in: u64,
    /// Time of the last completed write
    pub last_write: Option<Instant>,
    /// Time of the last completed read
    pub last_read: Option<Instant>,
}

/// Per-connection state.
pub struct Connection<E: Endpoint> {
    endpoint: Option<E>,
    source_device_id: u32,
    dest_device_id: u32,
    session_id: u32,
    conn_type: ConnectionType,
    key: SessionKey,
    supported: FlagSet<Feature>,
    negotiated: FlagSet<Feature>,
    status: FlagSet<Status>,
    init_state: InitState,
    auth_state: AuthState,
    negotiation_state: NegotiationState,
    username: Option<String>,
    config: ChannelConfig,
    stats: ConnectionStats,
}

impl<E: Endpoint> Connection<E> {
    /// Bind a connected endpoint.
    ///
    /// The connection starts with no supported cipher or compression;
    /// callers declare them with [`add_supported`](Self::add_supported).
    /// Incoming messages must carry `session_id` and the device ids of this
    /// link. A host that passes [`UNASSIGNED_SESSION`] (and destination 0)
    /// learns both from the peer.
    #[must_use]
    pub fn init(
        endpoint: E,
        source_device_id: u32,
        dest_device_id: u32,
        session_id: u32,
        key: SessionKey,
    ) -> Self {
        tracing::debug!(
            source = source_device_id,
            dest = dest_device_id,
            session = session_id,
            key = ?key,
            "connection initialized"
        );

        Self {
            endpoint: Some(endpoint),
            source_device_id,
            dest_device_id,
            session_id,
            conn_type: ConnectionType::Normal,
            key,
            supported: FlagSet::empty().with(Feature::EncapDefault),
            negotiated: FlagSet::empty(),
            status: FlagSet::empty(),
            init_state: InitState::Idle,
            auth_state: AuthState::Unauthenticated,
            negotiation_state: NegotiationState::NotNegotiated,
            username: None,
            config: ChannelConfig::default(),
            stats: ConnectionStats::default(),
        }
    }

    /// Bind a connected endpoint with cipher, compression and key pinned
    /// from a static configuration. The connection starts out negotiated.
    #[must_use]
    pub fn from_options(
        endpoint: E,
        source_device_id: u32,
        dest_device_id: u32,
        session_id: u32,
        options: &SessionOptions,
    ) -> Self {
        let mut conn = Self::init(
            endpoint,
            source_device_id,
            dest_device_id,
            session_id,
            options.key.clone(),
        );
        let features = options.features();
        conn.supported = features;
        conn.negotiated = features;
        conn.negotiation_state = NegotiationState::Negotiated;
        conn.status.insert(Status::Negotiated);

        tracing::debug!(features = ?features, "connection pinned from static options");
        conn
    }

    /// Set the connection type used by the init sequence.
    #[must_use]
    pub fn with_type(mut self, conn_type: ConnectionType) -> Self {
        self.conn_type = conn_type;
        self
    }

    /// Replace the channel configuration and apply its data read timeout to
    /// the endpoint.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the configuration is invalid, or the
    /// endpoint's error if the timeout cannot be set.
    pub fn with_config(mut self, config: ChannelConfig) -> Result<Self, Error> {
        config.validate()?;
        self.set_read_timeout(config.read_timeout())?;
        self.config = config;
        Ok(self)
    }

    /// Declare a locally supported feature. Idempotent.
    pub fn add_supported(&mut self, feature: Feature) {
        self.supported.insert(feature);
    }

    /// Replace the supported set. `EncapDefault` is always kept.
    pub fn set_supported(&mut self, features: FlagSet<Feature>) {
        self.supported = features.with(Feature::EncapDefault);
    }

    /// Release the endpoint and wipe the key.
    ///
    /// Closing an already closed connection is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the endpoint's shutdown error. The key is wiped regardless.
    pub fn close(&mut self) -> Result<(), Error> {
        let Some(mut endpoint) = self.endpoint.take() else {
            return Ok(());
        };

        self.key.zeroize();
        if let Some(name) = self.username.as_mut() {
            name.zeroize();
        }
        self.username = None;

        tracing::debug!(
            session = self.session_id,
            bytes_out = self.stats.bytes_out,
            bytes_in = self.stats.bytes_in,
            "connection closed"
        );
        endpoint.shutdown()?;
        Ok(())
    }

    /// Whether [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.endpoint.is_none()
    }

    /// Whether a handshake failed. A poisoned connection must be closed.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.init_state == InitState::Failed
            || self.auth_state == AuthState::Failed
            || self.negotiation_state == NegotiationState::Failed
    }

    /// Source device id.
    #[must_use]
    pub fn source_device_id(&self) -> u32 {
        self.source_device_id
    }

    /// Destination device id.
    #[must_use]
    pub fn dest_device_id(&self) -> u32 {
        self.dest_device_id
    }

    /// Session id.
    #[must_use]
    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    /// Connection type.
    #[must_use]
    pub fn connection_type(&self) -> ConnectionType {
        self.conn_type
    }

    /// Locally supported features.
    #[must_use]
    pub fn supported(&self) -> FlagSet<Feature> {
        self.supported
    }

    /// Features agreed with the peer.
    #[must_use]
    pub fn negotiated(&self) -> FlagSet<Feature> {
        self.negotiated
    }

    /// Milestones reached.
    #[must_use]
    pub fn status(&self) -> FlagSet<Status> {
        self.status
    }

    /// Whether a milestone has been reached.
    #[must_use]
    pub fn has_status(&self, status: Status) -> bool {
        self.status.contains(status)
    }

    /// Init sequence state.
    #[must_use]
    pub fn init_state(&self) -> InitState {
        self.init_state
    }

    /// Authentication state.
    #[must_use]
    pub fn auth_state(&self) -> AuthState {
        self.auth_state
    }

    /// Negotiation state.
    #[must_use]
    pub fn negotiation_state(&self) -> NegotiationState {
        self.negotiation_state
    }

    /// Authenticated user name, once authentication succeeds.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Channel configuration.
    #[must_use]
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Traffic counters.
    #[must_use]
    pub fn stats(&self) -> ConnectionStats {
        self.stats
    }

    /// Printable key fingerprint.
    #[must_use]
    pub fn key_fingerprint(&self) -> [u8; 8] {
        self.key.fingerprint()
    }

    /// Cipher for data messages: the negotiated one, or the baseline.
    #[must_use]
    pub fn data_cipher(&self) -> CipherKind {
        self.negotiated
            .iter()
            .find_map(Feature::cipher_kind)
            .unwrap_or(CipherKind::BASELINE)
    }

    /// Compression for data messages, if one was negotiated.
    #[must_use]
    pub fn data_compression(&self) -> Option<CompressionKind> {
        self.negotiated.iter().find_map(Feature::compression_kind)
    }

    pub(crate) fn ensure_usable(&self) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        if self.is_poisoned() {
            return Err(ChannelError::Poisoned);
        }
        Ok(())
    }

    pub(crate) fn endpoint_mut(&mut self) -> Result<&mut E, ChannelError> {
        self.endpoint.as_mut().ok_or(ChannelError::Closed)
    }

    pub(crate) fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), Error> {
        self.endpoint_mut()?.set_read_timeout(timeout)?;
        Ok(())
    }

    pub(crate) fn route(&self) -> Route {
        Route {
            source_device_id: self.source_device_id,
            dest_device_id: self.dest_device_id,
            session_id: self.session_id,
        }
    }

    /// Pipeline options for one outgoing message of `kind`.
    pub(crate) fn message_options(&self, kind: MessageKind) -> SessionOptions {
        let (cipher, compression) = match kind {
            MessageKind::Data => (Some(self.data_cipher()), self.data_compression()),
            MessageKind::Auth | MessageKind::Negotiate => (Some(CipherKind::BASELINE), None),
            MessageKind::Init | MessageKind::Alert => (None, None),
        };
        SessionOptions::new(SessionType::Default, compression, cipher, kind, self.key.clone())
    }

    pub(crate) fn key(&self) -> &SessionKey {
        &self.key
    }

    pub(crate) fn record_out(&mut self, count: WireCount) {
        self.stats.bytes_out += count.bytes;
        self.stats.packets_out += count.packets;
        self.stats.messages_out += 1;
        self.stats.last_write = Some(Instant::now());
    }

    pub(crate) fn record_in(&mut self, count: WireCount) {
        self.stats.bytes_in += count.bytes;
        self.stats.packets_in += count.packets;
        self.stats.messages_in += 1;
        self.stats.last_read = Some(Instant::now());
    }

    pub(crate) fn mark(&mut self, status: Status) {
        self.status.insert(status);
    }

    pub(crate) fn set_init_state(&mut self, state: InitState) {
        self.init_state = state;
    }

    pub(crate) fn set_auth_state(&mut self, state: AuthState) {
        self.auth_state = state;
    }

    pub(crate) fn set_negotiation_state(&mut self, state: NegotiationState) {
        self.negotiation_state = state;
    }

    pub(crate) fn set_negotiated(&mut self, features: FlagSet<Feature>) {
        self.negotiated = features;
    }

    pub(crate) fn set_username(&mut self, username: String) {
        self.username = Some(username);
    }

    /// Bind a connection with no session to the peer that sealed `route`.
    /// An unset destination device is learned as well.
    pub(crate) fn bind_session(&mut self, route: &Route) {
        self.session_id = route.session_id;
        if self.dest_device_id == 0 {
            self.dest_device_id = route.source_device_id;
        }
    }

    /// Adopt identifiers learned from the peer's init request.
    pub(crate) fn adopt_identity(
        &mut self,
        conn_type: ConnectionType,
        source_device_id: u32,
        dest_device_id: u32,
        session_id: u32,
    ) {
        self.conn_type = conn_type;
        self.source_device_id = source_device_id;
        self.dest_device_id = dest_device_id;
        self.session_id = session_id;
    }
}

impl<E: Endpoint> fmt::Debug for Connection<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("source_device_id", &self.source_device_id)
            .field("dest_device_id", &self.dest_device_id)
            .field("session_id", &self.session_id)
            .field("conn_type", &self.conn_type)
            .field("key", &self.key)
            .field("supported", &self.supported)
            .field("negotiated", &self.negotiated)
            .field("status", &self.status)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
