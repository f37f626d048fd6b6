//! Engine interface.
//!
//! [`SecureChannel`] gathers every engine operation behind one trait so that
//! bindings and tools can drive a connection without naming the free
//! functions in [`handshake`](crate::handshake) and [`channel`](crate::channel).

use crate::channel;
use crate::connection::Connection;
use crate::credentials::CredentialStore;
use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::flags::{Feature, FlagSet, Status};
use crate::handshake;

/// A secure inter-device connection.
pub trait SecureChannel {
    /// Declare a locally supported feature. Idempotent.
    fn declare_supported(&mut self, feature: Feature);

    /// Run the init sequence as the initiating side.
    ///
    /// # Errors
    ///
    /// See [`handshake::init_user`].
    fn init_user(&mut self) -> Result<(), Error>;

    /// Run the init sequence as the responding side.
    ///
    /// # Errors
    ///
    /// See [`handshake::init_host`].
    fn init_host(&mut self) -> Result<(), Error>;

    /// Authenticate as the initiating side.
    ///
    /// # Errors
    ///
    /// See [`handshake::authenticate_user`].
    fn authenticate_user(&mut self, username: &str, password: &str) -> Result<(), Error>;

    /// Authenticate the peer against `store`.
    ///
    /// # Errors
    ///
    /// See [`handshake::authenticate_host`].
    fn authenticate_host(&mut self, store: &dyn CredentialStore) -> Result<(), Error>;

    /// Negotiate as the initiating side.
    ///
    /// # Errors
    ///
    /// See [`handshake::negotiate_user`].
    fn negotiate_user(&mut self) -> Result<(), Error>;

    /// Negotiate as the responding side.
    ///
    /// # Errors
    ///
    /// See [`handshake::negotiate_host`].
    fn negotiate_host(&mut self) -> Result<(), Error>;

    /// Send one message.
    ///
    /// # Errors
    ///
    /// See [`channel::send`].
    fn send(&mut self, plaintext: &[u8]) -> Result<(), Error>;

    /// Receive one message.
    ///
    /// # Errors
    ///
    /// See [`channel::recv`].
    fn recv(&mut self) -> Result<Vec<u8>, Error>;

    /// Release the endpoint and wipe key material. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the endpoint's shutdown error.
    fn close(&mut self) -> Result<(), Error>;

    /// Milestones reached.
    fn status(&self) -> FlagSet<Status>;
}

impl<E: Endpoint> SecureChannel for Connection<E> {
    fn declare_supported(&mut self, feature: Feature) {
        self.add_supported(feature);
    }

    fn init_user(&mut self) -> Result<(), Error> {
        handshake::init_user(self)
    }

    fn init_host(&mut self) -> Result<(), Error> {
        handshake::init_host(self)
    }

    fn authenticate_user(&mut self, username: &str, password: &str) -> Result<(), Error> {
        handshake::authenticate_user(self, username, password)
    }

    fn authenticate_host(&mut self, store: &dyn CredentialStore) -> Result<(), Error> {
        handshake::authenticate_host(self, store)
    }

    fn negotiate_user(&mut self) -> Result<(), Error> {
        handshake::negotiate_user(self)
    }

    fn negotiate_host(&mut self) -> Result<(), Error> {
        handshake::negotiate_host(self)
    }

    fn send(&mut self, plaintext: &[u8]) -> Result<(), Error> {
        channel::send(self, plaintext)
    }

    fn recv(&mut self) -> Result<Vec<u8>, Error> {
        channel::recv(self)
    }

    fn close(&mut self) -> Result<(), Error> {
        Connection::close(self)
    }

    fn status(&self) -> FlagSet<Status> {
        Connection::status(self)
    }
}
