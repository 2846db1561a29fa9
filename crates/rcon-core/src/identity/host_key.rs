//! Host identity store
//!
//! The host key is generated on first use and persisted; later runs always
//! load the existing file. Creation is a two-step contract: attempt an
//! exclusive create, and on any failure fall through to loading, so that
//! concurrent first runs never overwrite each other's key.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use russh_keys::key::KeyPair;

use crate::error::{ConfigError, ResourceError};

/// Comment embedded in generated host keys
const HOST_KEY_COMMENT: &str = "single-rcon generated host key";

/// Load the host key at `path`, generating it first if the file is absent
pub fn load_or_create(path: &Path) -> Result<KeyPair, ResourceError> {
    match create_exclusive(path) {
        Ok(()) => {
            tracing::info!("Generated new host key at {:?}", path);
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            tracing::debug!("Host key already present at {:?}", path);
        }
        Err(e) => {
            tracing::warn!("Could not create host key at {:?}: {}", path, e);
        }
    }

    load(path)
}

/// Load an existing host key
pub fn load(path: &Path) -> Result<KeyPair, ResourceError> {
    let text = std::fs::read_to_string(path).map_err(|e| ResourceError::HostKey {
        path: path.to_path_buf(),
        message: format!("failed to read: {}", e),
    })?;

    russh_keys::decode_secret_key(&text, None).map_err(|e| ResourceError::HostKey {
        path: path.to_path_buf(),
        message: format!("failed to parse: {}", e),
    })
}

/// Decode an unencrypted private key given inline in configuration
pub fn decode_private_key(name: &str, text: &str) -> Result<KeyPair, ConfigError> {
    russh_keys::decode_secret_key(text.trim(), None).map_err(|e| ConfigError::InvalidKey {
        name: name.to_string(),
        message: e.to_string(),
    })
}

/// Generate a fresh Ed25519 key in OpenSSH format
pub fn generate_openssh_key() -> Result<String, ssh_key::Error> {
    let mut key =
        ssh_key::PrivateKey::random(&mut rand::rngs::OsRng, ssh_key::Algorithm::Ed25519)?;
    key.set_comment(HOST_KEY_COMMENT);
    let encoded = key.to_openssh(ssh_key::LineEnding::LF)?;
    Ok(encoded.to_string())
}

fn create_exclusive(path: &Path) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    let encoded = generate_openssh_key()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    file.write_all(encoded.as_bytes())?;
    file.sync_all()
}
