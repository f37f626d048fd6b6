//! SIDP CLI
//!
//! Secure Inter-Device Protocol host and user endpoints over TCP.

mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

use config::Config;
use sidp_core::handshake::auth::MAX_PASSWORD_LEN;
use sidp_core::{ChannelError, Connection, Error, SecureChannel, UNASSIGNED_SESSION};
use sidp_crypto::SessionKey;
use sidp_crypto::password::hash_password;
use sidp_crypto::random::random_u32;

/// SIDP - secure messaging between devices
#[derive(Parser)]
#[command(name = "sidp")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Pre-shared key file, overriding the configuration
    #[arg(short, long)]
    key_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept connections and echo every message back
    Host {
        /// Listen address, overriding the configuration
        #[arg(short, long)]
        bind: Option<String>,

        /// Expect the init sequence before authentication
        #[arg(long)]
        init: bool,

        /// Serve a single connection, then exit
        #[arg(long)]
        once: bool,
    },

    /// Connect to a host and exchange messages
    User {
        /// Host address
        #[arg(required = true)]
        addr: String,

        /// Host device id
        #[arg(long)]
        peer: u32,

        /// User name
        #[arg(short, long)]
        username: String,

        /// Session id (random if omitted)
        #[arg(long)]
        session: Option<u32>,

        /// Run the init sequence before authentication
        #[arg(long)]
        init: bool,

        /// Messages to send; lines from stdin when omitted
        #[arg(short, long)]
        message: Vec<String>,
    },

    /// Hash a password for the [[credentials]] section
    HashPassword {
        /// User name for the generated entry
        #[arg(required = true)]
        username: String,
    },

    /// Generate a new pre-shared key
    Keygen {
        /// Output file for the hex-encoded key
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::load_or_default()?,
    };
    config.validate()?;

    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();

    let key_file = cli.key_file.or_else(|| config.security.key_file.clone());

    match cli.command {
        Commands::Host { bind, init, once } => {
            let key = load_key(key_file.as_deref())?;
            run_host(bind, init, once, key, &config)?;
        }
        Commands::User {
            addr,
            peer,
            username,
            session,
            init,
            message,
        } => {
            let key = load_key(key_file.as_deref())?;
            let session = match session {
                Some(id) => id,
                None => random_session_id()?,
            };
            let target = UserTarget {
                addr,
                peer,
                session,
                init,
            };
            run_user(&target, &username, &message, key, &config)?;
        }
        Commands::HashPassword { username } => {
            hash_for(&username, &config)?;
        }
        Commands::Keygen { output } => {
            generate_key(output)?;
        }
    }

    Ok(())
}

/// Read a hex key file, or derive the key from a prompted passphrase.
fn load_key(key_file: Option<&Path>) -> anyhow::Result<SessionKey> {
    if let Some(path) = key_file {
        let text = Zeroizing::new(
            std::fs::read_to_string(path)
                .with_context(|| format!("failed to read key file {}", path.display()))?,
        );
        let bytes = Zeroizing::new(hex::decode(text.trim()).context("key file is not valid hex")?);
        return Ok(SessionKey::from_slice(&bytes)?);
    }

    let passphrase = Zeroizing::new(rpassword::prompt_password("Pre-shared passphrase: ")?);
    if passphrase.is_empty() {
        anyhow::bail!("empty passphrase");
    }
    Ok(SessionKey::from_passphrase(passphrase.as_bytes()))
}

/// Random session id; never the id a host uses to mean "learn from peer"
fn random_session_id() -> anyhow::Result<u32> {
    loop {
        let id = random_u32()?;
        if id != UNASSIGNED_SESSION {
            return Ok(id);
        }
    }
}

/// Accept connections and echo messages until each peer hangs up
fn run_host(
    bind: Option<String>,
    init: bool,
    once: bool,
    key: SessionKey,
    config: &Config,
) -> anyhow::Result<()> {
    let bind = bind.unwrap_or_else(|| config.device.listen_addr.clone());
    let store = config.credential_store()?;
    if store.is_empty() {
        tracing::warn!("no [[credentials]] configured; every user will be rejected");
    }

    let listener = TcpListener::bind(&bind).with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(addr = %listener.local_addr()?, device = config.device.id, "listening");

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };
        let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_default();

        match serve(stream, init, key.clone(), &store, config) {
            Ok(messages) => tracing::info!(%peer, messages, "session finished"),
            Err(e) => tracing::warn!(%peer, error = %e, "session failed"),
        }

        if once {
            break;
        }
    }
    Ok(())
}

fn serve(
    stream: TcpStream,
    init: bool,
    key: SessionKey,
    store: &sidp_core::MemoryCredentialStore,
    config: &Config,
) -> Result<u64, Error> {
    // The peer's ids are learned from the init sequence when it runs.
    let mut conn = Connection::init(stream, config.device.id, 0, UNASSIGNED_SESSION, key)
        .with_type(config.device.connection_type)
        .with_config(config.channel)?;
    conn.set_supported(config.features());

    let result = run_session(&mut conn, init, store);

    if let Err(e) = conn.close() {
        tracing::debug!(error = %e, "close failed");
    }
    result
}

fn run_session(
    conn: &mut Connection<TcpStream>,
    init: bool,
    store: &sidp_core::MemoryCredentialStore,
) -> Result<u64, Error> {
    if init {
        conn.init_host()?;
    }
    conn.authenticate_host(store)?;
    conn.negotiate_host()?;
    tracing::info!(
        user = conn.username().unwrap_or_default(),
        cipher = conn.data_cipher().name(),
        compression = conn.data_compression().map_or("none", |c| c.name()),
        "session established"
    );

    let mut echoed = 0u64;
    loop {
        match conn.recv() {
            Ok(message) => {
                tracing::debug!(len = message.len(), "received");
                conn.send(&message)?;
                echoed += 1;
            }
            Err(Error::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(echoed),
            Err(e) => return Err(e),
        }
    }
}

struct UserTarget {
    addr: String,
    peer: u32,
    session: u32,
    init: bool,
}

/// Connect, run the handshakes and exchange messages with a host
fn run_user(
    target: &UserTarget,
    username: &str,
    messages: &[String],
    key: SessionKey,
    config: &Config,
) -> anyhow::Result<()> {
    let password = Zeroizing::new(rpassword::prompt_password(format!("Password for {username}: "))?);

    let stream = TcpStream::connect(&target.addr)
        .with_context(|| format!("failed to connect to {}", target.addr))?;
    let mut conn = Connection::init(stream, config.device.id, target.peer, target.session, key)
        .with_type(config.device.connection_type)
        .with_config(config.channel)?;
    conn.set_supported(config.features());

    if target.init {
        conn.init_user()?;
    }
    conn.authenticate_user(username, &password)?;
    conn.negotiate_user()?;

    println!("Connected to device {} (session {:#010x})", target.peer, target.session);
    println!(
        "Cipher: {}, compression: {}",
        conn.data_cipher().name(),
        conn.data_compression().map_or("none", |c| c.name())
    );

    let result = if messages.is_empty() {
        let stdin = io::stdin();
        exchange(&mut conn, stdin.lock().lines().map_while(Result::ok))
    } else {
        exchange(&mut conn, messages.iter().cloned())
    };

    let stats = conn.stats();
    conn.close()?;
    println!(
        "Sent {} messages ({} bytes on the wire), received {} ({} bytes)",
        stats.messages_out, stats.bytes_out, stats.messages_in, stats.bytes_in
    );
    result
}

fn exchange<E: sidp_core::Endpoint>(
    conn: &mut Connection<E>,
    lines: impl Iterator<Item = String>,
) -> anyhow::Result<()> {
    let mut out = io::stdout().lock();
    for line in lines {
        conn.send(line.as_bytes())?;
        match conn.recv() {
            Ok(reply) => writeln!(out, "{}", String::from_utf8_lossy(&reply))?,
            Err(Error::Channel(ChannelError::PeerAlert(reason))) => {
                anyhow::bail!("host sent alert: {reason}")
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Prompt for a password and print a ready-to-paste credentials entry
fn hash_for(username: &str, config: &Config) -> anyhow::Result<()> {
    let password = Zeroizing::new(rpassword::prompt_password(format!("Password for {username}: "))?);
    let confirm = Zeroizing::new(rpassword::prompt_password("Confirm password: ")?);
    if *password != *confirm {
        anyhow::bail!("passwords do not match");
    }
    if password.len() > MAX_PASSWORD_LEN {
        anyhow::bail!("password longer than {MAX_PASSWORD_LEN} bytes");
    }

    let phc = hash_password(password.as_bytes(), &config.security.password_params)?;
    let entry = config::Credential {
        username: username.to_string(),
        password_hash: phc,
    };

    #[derive(serde::Serialize)]
    struct Section<'a> {
        credentials: [&'a config::Credential; 1],
    }
    print!("{}", toml::to_string(&Section { credentials: [&entry] })?);
    Ok(())
}

/// Generate a new random pre-shared key
fn generate_key(output: Option<PathBuf>) -> anyhow::Result<()> {
    let key = SessionKey::generate()?;
    let encoded = Zeroizing::new(hex::encode(key.as_bytes()));
    let fingerprint = hex::encode(key.fingerprint());

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, format!("{}\n", encoded.as_str()))?;
            println!("Key saved to: {}", path.display());
            println!("Fingerprint: {fingerprint}");
            println!("\nCopy this file to the peer over a trusted channel.");
        }
        None => {
            println!("{}", encoded.as_str());
            eprintln!("Fingerprint: {fingerprint}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_session_id_is_assigned() {
        let ids: Vec<u32> = (0..32).map(|_| random_session_id().unwrap()).collect();
        assert!(ids.iter().all(|&id| id != UNASSIGNED_SESSION));
        assert!(ids.iter().any(|&id| id != ids[0]));
    }
}
