//! Versioned secrets and key rotation.
//!
//! A [`SecretRegistry`] is an ordered, non-empty list of secrets. The first entry is the current
//! secret and seals every outgoing cookie; the others only open cookies issued before a rotation.
//! Each secret's encryption key is derived once when the registry is built, so the registry doubles
//! as the key cache: building a new registry is how the cache is invalidated.

use std::fmt;

use crate::{crypto::SessionKey, error::ConfigError};

/// Identifier carried in the cookie next to the ciphertext.
pub type SecretId = u32;

/// Id given to a secret supplied on its own.
pub const DEFAULT_SECRET_ID: SecretId = 1;

/// Key material tagged with the id it is published under.
#[derive(Clone)]
pub struct Secret {
    id: SecretId,
    key: SessionKey,
}

impl Secret {
    pub fn new(id: SecretId, material: impl AsRef<[u8]>) -> Result<Self, ConfigError> {
        let material = material.as_ref();
        if id == 0 {
            return Err(ConfigError::InvalidSecretId(id));
        }
        if material.is_empty() {
            return Err(ConfigError::EmptySecret(id));
        }

        let key = SessionKey::derive(material).map_err(|_| ConfigError::KeyDerivation(id))?;
        Ok(Self { id, key })
    }

    pub fn id(&self) -> SecretId {
        self.id
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Short digest of the derived key, for log lines.
    pub fn fingerprint(&self) -> String {
        self.key.fingerprint()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("id", &self.id)
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct SecretRegistry {
    secrets: Vec<Secret>,
}

impl SecretRegistry {
    /// Build a registry from secrets ordered newest first.
    pub fn new(secrets: Vec<Secret>) -> Result<Self, ConfigError> {
        if secrets.is_empty() {
            return Err(ConfigError::MissingSecret);
        }

        for (index, secret) in secrets.iter().enumerate() {
            if secrets[..index].iter().any(|other| other.id == secret.id) {
                return Err(ConfigError::DuplicateSecretId(secret.id));
            }
        }

        Ok(Self { secrets })
    }

    /// Registry holding one secret under [`DEFAULT_SECRET_ID`].
    pub fn single(material: impl AsRef<[u8]>) -> Result<Self, ConfigError> {
        Self::new(vec![Secret::new(DEFAULT_SECRET_ID, material)?])
    }

    /// Build a registry from `(id, material)` pairs ordered newest first.
    pub fn from_pairs<I, M>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (SecretId, M)>,
        M: AsRef<[u8]>,
    {
        let secrets = pairs
            .into_iter()
            .map(|(id, material)| Secret::new(id, material))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(secrets)
    }

    /// The secret used for all new encryption.
    pub fn current(&self) -> &Secret {
        &self.secrets[0]
    }

    /// Look up the secret a cookie was sealed with.
    ///
    /// Unknown or unparseable ids fall back to the current secret; opening will then most likely
    /// fail authentication and the session is discarded.
    pub fn resolve(&self, id: Option<SecretId>) -> &Secret {
        id.and_then(|id| self.get(id))
            .unwrap_or_else(|| self.current())
    }

    pub fn get(&self, id: SecretId) -> Option<&Secret> {
        self.secrets.iter().find(|secret| secret.id == id)
    }

    pub fn contains(&self, id: SecretId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Secret> {
        self.secrets.iter()
    }
}
