use crate::error::{Result, VaultError};
use std::sync::Arc;

pub const DEFAULT_MIN_PASSPHRASE_LEN: usize = 8;
pub const DEFAULT_REDACTION_PLACEHOLDER: &str = "[encrypted]";

/// Caller-supplied passphrase rule, applied when a passphrase is chosen
/// (setup, change). Never applied on unlock.
pub trait PassphrasePolicy: Send + Sync {
    fn check(&self, passphrase: &str) -> std::result::Result<(), String>;
}

/// Minimum length in characters.
#[derive(Debug, Clone, Copy)]
pub struct MinLength(pub usize);

impl PassphrasePolicy for MinLength {
    fn check(&self, passphrase: &str) -> std::result::Result<(), String> {
        let len = passphrase.chars().count();
        if len < self.0 {
            return Err(format!(
                "passphrase too short ({} characters, minimum {})",
                len, self.0
            ));
        }
        Ok(())
    }
}

/// Vault configuration
#[derive(Clone)]
pub struct VaultConfig {
    /// Rule a new passphrase must satisfy
    pub passphrase_policy: Arc<dyn PassphrasePolicy>,
    /// Written over every plaintext field once a record has been sealed
    pub redaction_placeholder: String,
}

impl std::fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultConfig")
            .field("passphrase_policy", &"<dyn PassphrasePolicy>")
            .field("redaction_placeholder", &self.redaction_placeholder)
            .finish()
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            passphrase_policy: Arc::new(MinLength(DEFAULT_MIN_PASSPHRASE_LEN)),
            redaction_placeholder: DEFAULT_REDACTION_PLACEHOLDER.to_string(),
        }
    }
}

impl VaultConfig {
    pub fn builder() -> VaultConfigBuilder {
        VaultConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.redaction_placeholder.is_empty() {
            return Err(VaultError::InvalidConfig(
                "redaction_placeholder must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn check_passphrase(&self, passphrase: &str) -> Result<()> {
        self.passphrase_policy
            .check(passphrase)
            .map_err(VaultError::WeakPassphrase)
    }
}

/// Builder for VaultConfig
#[derive(Debug, Default)]
pub struct VaultConfigBuilder {
    config: VaultConfig,
}

impl VaultConfigBuilder {
    /// Replace the passphrase policy
    pub fn passphrase_policy(mut self, policy: impl PassphrasePolicy + 'static) -> Self {
        self.config.passphrase_policy = Arc::new(policy);
        self
    }

    /// Shorthand for `passphrase_policy(MinLength(len))`
    pub fn min_passphrase_len(self, len: usize) -> Self {
        self.passphrase_policy(MinLength(len))
    }

    pub fn redaction_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.config.redaction_placeholder = placeholder.into();
        self
    }

    /// Build and validate configuration
    pub fn build(self) -> Result<VaultConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
