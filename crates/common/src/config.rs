use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};

/// Relay protocol constants
pub mod protocol {
    /// Default path of the configuration file
    pub const DEFAULT_CONFIG_PATH: &str = "config.json";

    /// Port exposed on the overlay by a freshly generated config
    pub const DEFAULT_EXPOSED_PORT: u16 = 80;

    /// Loopback port the backend is expected on by a freshly generated config
    pub const DEFAULT_LOCAL_PORT: u16 = 8080;

    /// UDP port the overlay endpoint binds by default
    pub const DEFAULT_LISTEN_PORT: u16 = 9090;

    /// Length of the virtual port header that opens every overlay stream
    pub const PORT_HEADER_LEN: usize = 2;

    /// Status byte sent back when the requested port is exposed
    pub const STREAM_ACCEPTED: u8 = 0x00;

    /// Status byte sent back when the requested port is not exposed
    pub const STREAM_REJECTED: u8 = 0x01;

    /// Idle timeout for overlay connections, in milliseconds
    pub const IDLE_TIMEOUT_MS: u32 = 60_000;

    /// Keep-alive interval for overlay connections
    pub const KEEPALIVE_INTERVAL_SECS: u64 = 5;

    /// Bidirectional streams a single overlay connection may keep open
    pub const MAX_STREAMS_PER_CONNECTION: u32 = 1024;
}

/// Address of the backend that inbound traffic is forwarded to.
///
/// Accepts either a full `host:port` string or a bare port number, which
/// is bound to the IPv4 loopback interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LocalTarget {
    Port(u16),
    Address(String),
}

impl LocalTarget {
    /// Normalized address handed to the dialer
    pub fn dial_address(&self) -> String {
        match self {
            Self::Port(port) => loopback(*port),
            Self::Address(addr) => {
                let addr = addr.trim();
                match addr.parse::<u16>() {
                    Ok(port) => loopback(port),
                    Err(_) => addr.to_string(),
                }
            }
        }
    }
}

fn loopback(port: u16) -> String {
    SocketAddrV4::new(Ipv4Addr::LOCALHOST, port).to_string()
}

impl Default for LocalTarget {
    fn default() -> Self {
        Self::Address(loopback(protocol::DEFAULT_LOCAL_PORT))
    }
}

/// Which overlay ports are announced and where their traffic goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingConfig {
    pub exposed_ports: Vec<u16>,
    pub local_target: LocalTarget,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            exposed_ports: vec![protocol::DEFAULT_EXPOSED_PORT],
            local_target: LocalTarget::default(),
        }
    }
}

/// On-disk configuration.
///
/// Legacy field names (`KeyBase64`, `RemotePorts`, `LocalAddress`) are
/// accepted as aliases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Base64 encoded Ed25519 seed
    #[serde(alias = "KeyBase64")]
    pub identity: String,

    /// Ports announced on the overlay
    #[serde(alias = "RemotePorts")]
    pub exposed_ports: Vec<u16>,

    /// Backend every exposed port maps to
    #[serde(alias = "LocalAddress")]
    pub local_target: LocalTarget,

    /// UDP address the overlay endpoint binds
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, protocol::DEFAULT_LISTEN_PORT))
}

impl RelayConfig {
    /// Build a config around an encoded identity with default routing
    pub fn with_identity(identity: String) -> Self {
        let routing = RoutingConfig::default();
        Self {
            identity,
            exposed_ports: routing.exposed_ports,
            local_target: routing.local_target,
            listen_addr: default_listen_addr(),
        }
    }

    pub fn routing(&self) -> RoutingConfig {
        RoutingConfig {
            exposed_ports: self.exposed_ports.clone(),
            local_target: self.local_target.clone(),
        }
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save configuration to a JSON file.
    ///
    /// The file is written next to its destination and renamed into place,
    /// so readers never observe a partial config.
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let temp_path = temp_path(path);
        if let Err(source) = write_synced(&temp_path, contents.as_bytes()) {
            let _ = fs::remove_file(&temp_path);
            return Err(write_err(source));
        }

        if let Err(source) = fs::rename(&temp_path, path) {
            let _ = fs::remove_file(&temp_path);
            return Err(write_err(source));
        }

        sync_parent(path).map_err(write_err)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    // A stale staging file would keep its old permissions
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
        _ => {}
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    // The file holds a private key
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Persist a rename by syncing the directory holding `path`
#[cfg(unix)]
fn sync_parent(path: &Path) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::File::open(parent)?.sync_all()
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> io::Result<()> {
    Ok(())
}
