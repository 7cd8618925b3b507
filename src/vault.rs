//! Credential storage for launch targets
//!
//! Secrets live in the platform keychain (Windows Credential Manager, macOS
//! Keychain, Secret Service on Linux) under the service `ignition` with the
//! credential name as the user. For headless machines the environment variable
//! `IGNITION_SECRET_<NAME>` is consulted when the keychain has no entry.

use launchkit::{CredentialHandle, CredentialProvider, Secret};
use thiserror::Error;

/// Keychain service all ignition secrets are stored under
pub const KEYRING_SERVICE: &str = "ignition";

/// Prefix of the environment fallback
pub const ENV_PREFIX: &str = "IGNITION_SECRET_";

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Keychain error for '{name}': {error}")]
    Keyring { name: String, error: String },

    #[error("No stored secret named '{0}'")]
    NotFound(String),

    #[error("Secret for '{0}' is empty")]
    Empty(String),
}

/// Where a secret would be resolved from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretSource {
    Keyring,
    Environment,
    Missing,
}

impl std::fmt::Display for SecretSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Keyring => "system keychain",
            Self::Environment => "environment",
            Self::Missing => "not set",
        };
        f.write_str(label)
    }
}

/// Environment variable consulted for `name`: upper-cased, non-alphanumerics become `_`
pub fn env_var_name(name: &str) -> String {
    let suffix: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{ENV_PREFIX}{suffix}")
}

/// Keychain-backed credential provider with an environment fallback
#[derive(Debug, Clone)]
pub struct KeyringCredentials {
    service: String,
    use_keyring: bool,
}

impl Default for KeyringCredentials {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyringCredentials {
    pub fn new() -> Self {
        Self {
            service: KEYRING_SERVICE.to_string(),
            use_keyring: true,
        }
    }

    /// Resolve from the environment only
    pub fn environment_only() -> Self {
        Self {
            use_keyring: false,
            ..Self::new()
        }
    }

    fn entry(&self, name: &str) -> Result<keyring::Entry, VaultError> {
        keyring::Entry::new(&self.service, name).map_err(|e| VaultError::Keyring {
            name: name.to_string(),
            error: e.to_string(),
        })
    }

    fn from_keyring(&self, name: &str) -> Result<Option<String>, VaultError> {
        if !self.use_keyring {
            return Ok(None);
        }
        match self.entry(name)?.get_password() {
            Ok(password) => Ok(Some(password)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(VaultError::Keyring {
                name: name.to_string(),
                error: e.to_string(),
            }),
        }
    }

    fn from_env(name: &str) -> Option<String> {
        std::env::var(env_var_name(name))
            .ok()
            .filter(|v| !v.is_empty())
    }

    /// Look up `name`: keychain, then environment
    pub fn lookup(&self, name: &str) -> Result<Option<Secret>, VaultError> {
        if let Some(password) = self.from_keyring(name)? {
            return Ok(Some(Secret::new(password)));
        }
        Ok(Self::from_env(name).map(Secret::new))
    }

    pub fn source(&self, name: &str) -> Result<SecretSource, VaultError> {
        if self.from_keyring(name)?.is_some() {
            Ok(SecretSource::Keyring)
        } else if Self::from_env(name).is_some() {
            Ok(SecretSource::Environment)
        } else {
            Ok(SecretSource::Missing)
        }
    }

    /// Store a secret in the keychain
    pub fn store(&self, name: &str, value: &str) -> Result<(), VaultError> {
        if value.is_empty() {
            return Err(VaultError::Empty(name.to_string()));
        }
        self.entry(name)?
            .set_password(value)
            .map_err(|e| VaultError::Keyring {
                name: name.to_string(),
                error: e.to_string(),
            })?;
        log::debug!("Stored secret in keychain: {name}");
        Ok(())
    }

    /// Remove a secret from the keychain
    pub fn remove(&self, name: &str) -> Result<(), VaultError> {
        match self.entry(name)?.delete_credential() {
            Ok(()) => {
                log::debug!("Removed secret from keychain: {name}");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => Err(VaultError::NotFound(name.to_string())),
            Err(e) => Err(VaultError::Keyring {
                name: name.to_string(),
                error: e.to_string(),
            }),
        }
    }
}

impl CredentialProvider for KeyringCredentials {
    fn resolve(&self, handle: &CredentialHandle) -> Option<Secret> {
        match self.lookup(handle.service()) {
            Ok(secret) => secret,
            Err(e) => {
                log::warn!("{e}");
                Self::from_env(handle.service()).map(Secret::new)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_env_var_name() {
        assert_eq!(env_var_name("vpn"), "IGNITION_SECRET_VPN");
        assert_eq!(env_var_name("corp-vpn.main"), "IGNITION_SECRET_CORP_VPN_MAIN");
    }

    #[test]
    fn test_environment_fallback() {
        let name = "vault-test-env";
        let var = env_var_name(name);
        // SAFETY: variable is unique to this test
        unsafe { env::set_var(&var, "hunter2") };

        let vault = KeyringCredentials::environment_only();
        let secret = vault.resolve(&CredentialHandle::new(name)).unwrap();
        assert_eq!(secret.expose(), "hunter2");
        assert_eq!(vault.source(name).unwrap(), SecretSource::Environment);

        // SAFETY: as above
        unsafe { env::remove_var(&var) };
        assert!(vault.resolve(&CredentialHandle::new(name)).is_none());
        assert_eq!(vault.source(name).unwrap(), SecretSource::Missing);
    }

    #[test]
    fn test_empty_env_value_is_missing() {
        let name = "vault-test-empty";
        let var = env_var_name(name);
        // SAFETY: variable is unique to this test
        unsafe { env::set_var(&var, "") };
        let vault = KeyringCredentials::environment_only();
        assert!(vault.lookup(name).unwrap().is_none());
        // SAFETY: as above
        unsafe { env::remove_var(&var) };
    }

    #[test]
    fn test_store_rejects_empty_secret() {
        let vault = KeyringCredentials::environment_only();
        assert!(matches!(vault.store("x", ""), Err(VaultError::Empty(_))));
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = Secret::new("hunter2");
        assert!(!format!("{secret:?}").contains("hunter2"));
    }
}
