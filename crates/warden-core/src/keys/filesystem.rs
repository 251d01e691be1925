//! Filesystem key provider.
//!
//! Keys live at `<confroot>/keys/<mech>-<usecase>.tokenkey`, PEM-encoded.
//! Convention: public keys ship mode 0644, private keys 0400; the
//! provider does not enforce modes, it only reads what provisioning laid
//! down.

use std::path::PathBuf;
use std::sync::Arc;

use super::{KeyProvider, KeyProviderError};
use crate::config::ServerConfig;
use crate::errors::Error;

/// Reads `.tokenkey` files from a key directory.
pub struct FilesystemKeys {
    keydir: PathBuf,
}

impl FilesystemKeys {
    /// Creates a provider over `keydir`.
    #[must_use]
    pub fn new(keydir: PathBuf) -> Self {
        Self { keydir }
    }

    /// Registered factory for the `filesystem` provider; the directory is
    /// `<core.conf>/keys`.
    ///
    /// # Errors
    ///
    /// Infallible; missing keys surface per lookup.
    pub fn factory(config: &ServerConfig) -> Result<Arc<dyn KeyProvider>, Error> {
        Ok(Arc::new(Self::new(config.key_dir())))
    }
}

impl KeyProvider for FilesystemKeys {
    fn provide(&self, mechanism: &str, usecase: &str) -> Result<Vec<u8>, KeyProviderError> {
        let path = self.keydir.join(format!("{mechanism}-{usecase}.tokenkey"));
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(KeyProviderError::NoSuchKey {
                    mechanism: mechanism.to_string(),
                    usecase: usecase.to_string(),
                })
            }
            Err(e) => Err(KeyProviderError::Internal(format!(
                "cannot read {}: {e}",
                path.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_labeled_key_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("rsa-public.tokenkey"), b"PEM BYTES").unwrap();

        let provider = FilesystemKeys::new(dir.path().to_path_buf());
        assert_eq!(provider.provide("rsa", "public").unwrap(), b"PEM BYTES");
    }

    #[test]
    fn missing_key_is_no_such_key() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FilesystemKeys::new(dir.path().to_path_buf());
        assert_eq!(
            provider.provide("rsa", "private"),
            Err(KeyProviderError::NoSuchKey {
                mechanism: "rsa".to_string(),
                usecase: "private".to_string(),
            })
        );
    }

    #[test]
    fn label_maps_to_expected_filename() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ed25519-signing.tokenkey"), b"K").unwrap();
        let provider = FilesystemKeys::new(dir.path().to_path_buf());
        assert!(provider.provide("ed25519", "signing").is_ok());
        assert!(provider.provide("ed25519", "public").is_err());
    }
}
