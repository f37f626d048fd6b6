//! Test helpers for two-sided sessions
//!
//! Every handshake blocks until the peer answers, so the host side of each
//! fixture runs on its own thread.

use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};

use sidp_core::{
    Connection, Endpoint, Error, Feature, MemoryCredentialStore, MemoryEndpoint, SecureChannel,
};
use sidp_crypto::SessionKey;
use sidp_crypto::password::PasswordParams;

/// Device id of the initiating side
pub const USER_DEVICE: u32 = 0x0000_000A;

/// Device id of the responding side
pub const HOST_DEVICE: u32 = 0x0000_0014;

/// Session id used by fixtures
pub const SESSION: u32 = 0x1234;

/// Account known to [`credential_store`]
pub const USERNAME: &str = "sensor-1";

/// Password of [`USERNAME`]
pub const PASSWORD: &str = "correct horse battery staple";

/// Every cipher and compression feature
pub const ALL_FEATURES: [Feature; 4] = [
    Feature::CipherAes256,
    Feature::CipherXSalsa20,
    Feature::CompressLzo,
    Feature::CompressZlib,
];

/// Pre-shared key both sides hold.
pub fn test_key() -> SessionKey {
    SessionKey::from_passphrase(b"integration test passphrase")
}

/// Credential store holding [`USERNAME`] / [`PASSWORD`], with cheap hashing.
pub fn credential_store() -> MemoryCredentialStore {
    let mut store = MemoryCredentialStore::new(PasswordParams::low_security());
    store
        .add_user(USERNAME, PASSWORD.as_bytes())
        .expect("hash test password");
    store
}

/// Wrap two endpoints in user and host connections declaring `user` and
/// `host` features respectively.
pub fn connections<E: Endpoint>(
    user_endpoint: E,
    host_endpoint: E,
    user: &[Feature],
    host: &[Feature],
) -> (Connection<E>, Connection<E>) {
    let mut u = Connection::init(user_endpoint, USER_DEVICE, HOST_DEVICE, SESSION, test_key());
    let mut h = Connection::init(host_endpoint, HOST_DEVICE, USER_DEVICE, SESSION, test_key());
    for feature in user {
        u.declare_supported(*feature);
    }
    for feature in host {
        h.declare_supported(*feature);
    }
    (u, h)
}

/// In-memory user and host connections.
pub fn memory_pair(
    user: &[Feature],
    host: &[Feature],
) -> (Connection<MemoryEndpoint>, Connection<MemoryEndpoint>) {
    let (a, b) = MemoryEndpoint::pair();
    connections(a, b, user, host)
}

/// Two TCP streams connected over loopback: (user side, host side).
pub fn tcp_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    let user = TcpStream::connect(addr).expect("connect loopback");
    let (host, _) = listener.accept().expect("accept loopback");
    (user, host)
}

/// Run authentication then negotiation on both sides.
///
/// Returns each side's first error, if any, along with the connections.
pub fn handshake<E: Endpoint + Send + 'static>(
    mut user: Connection<E>,
    mut host: Connection<E>,
    password: &str,
) -> (
    Result<(), Error>,
    Result<(), Error>,
    Connection<E>,
    Connection<E>,
) {
    let h = thread::spawn(move || {
        let store = credential_store();
        let r = host
            .authenticate_host(&store)
            .and_then(|()| host.negotiate_host());
        (r, host)
    });
    let ur = user
        .authenticate_user(USERNAME, password)
        .and_then(|()| user.negotiate_user());
    let (hr, host) = h.join().expect("host thread");
    (ur, hr, user, host)
}

/// Run the full handshake and panic if either side fails.
pub fn establish<E: Endpoint + Send + 'static>(
    user: Connection<E>,
    host: Connection<E>,
) -> (Connection<E>, Connection<E>) {
    let (ur, hr, user, host) = handshake(user, host, PASSWORD);
    ur.expect("user handshake");
    hr.expect("host handshake");
    (user, host)
}

/// Echo every message back until the peer hangs up. Returns the connection
/// and the number of messages echoed.
pub fn spawn_echo<E: Endpoint + Send + 'static>(
    mut host: Connection<E>,
) -> JoinHandle<Result<(Connection<E>, u64), Error>> {
    thread::spawn(move || {
        let mut echoed = 0;
        loop {
            match host.recv() {
                Ok(message) => {
                    host.send(&message)?;
                    echoed += 1;
                }
                Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok((host, echoed));
                }
                Err(e) => return Err(e),
            }
        }
    })
}

/// Deterministic, poorly compressible payload.
pub fn noise(len: usize) -> Vec<u8> {
    let mut state = 0x2545_F491u32;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}
