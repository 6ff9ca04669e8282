//! Configuration file loading and environment overrides

use crate::config::types::PagevaultConfigFile;
use crate::error::{Error, Result};
use crate::layout::{BlobLayout, SecretLayout};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use tracing::debug;

/// Configuration file names to search for
const CONFIG_FILE_NAMES: &[&str] = &["pagevault.yaml", "pagevault.yml"];

/// Loaded and validated pagevault configuration
#[derive(Debug, Clone)]
pub struct PagevaultConfig {
    /// The parsed configuration
    pub config: PagevaultConfigFile,

    /// Path to the configuration file, if one was found
    pub config_path: Option<Utf8PathBuf>,
}

impl PagevaultConfig {
    /// Load configuration from the specified path or search for it.
    ///
    /// When no path is given and no file is found, defaults are used.
    /// Environment overrides are applied in both cases.
    pub fn load(path: Option<&Utf8Path>) -> Result<Self> {
        let found = match path {
            Some(p) => {
                let content = fs::read_to_string(p).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        Error::config_not_found(p.as_str())
                    } else {
                        Error::Io(e)
                    }
                })?;
                Some((p.to_owned(), content))
            }
            None => Self::find_config()?,
        };

        let (config, config_path) = match found {
            Some((path, content)) => {
                debug!("Loading configuration from {}", path);
                (Self::parse(&content)?, Some(path))
            }
            None => {
                debug!("No configuration file found, using defaults");
                (PagevaultConfigFile::default(), None)
            }
        };

        let mut loaded = Self {
            config,
            config_path,
        };
        loaded.apply_env_overrides(|key| std::env::var(key).ok())?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Parse configuration content without touching the environment
    pub fn parse(content: &str) -> Result<PagevaultConfigFile> {
        Ok(serde_yaml_ng::from_str(content)?)
    }

    /// Build from an already-parsed file (used by tests and embedders)
    pub fn from_file(config: PagevaultConfigFile) -> Result<Self> {
        let loaded = Self {
            config,
            config_path: None,
        };
        loaded.validate()?;
        Ok(loaded)
    }

    /// Find configuration file in current directory or parent directories
    fn find_config() -> Result<Option<(Utf8PathBuf, String)>> {
        let cwd = std::env::current_dir().map_err(Error::Io)?;
        let cwd = Utf8PathBuf::try_from(cwd)
            .map_err(|_| Error::invalid_config("Current directory path is not valid UTF-8"))?;

        let mut current = cwd.as_path();
        loop {
            for name in CONFIG_FILE_NAMES {
                let path = current.join(name);
                if path.exists() {
                    let content = fs::read_to_string(&path)?;
                    return Ok(Some((path, content)));
                }
            }
            match current.parent() {
                Some(parent) => current = parent,
                None => return Ok(None),
            }
        }
    }

    /// Apply overrides from a variable lookup (the process environment in `load`)
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let cfg = &mut self.config;

        if let Some(addr) = lookup("VAULT_ADDR") {
            cfg.vault.address = addr;
        }
        if let Some(ns) = lookup("VAULT_NAMESPACE") {
            cfg.vault.namespace = Some(ns);
        }
        if let Some(timeout) = lookup("VAULT_TIMEOUT") {
            cfg.vault.timeout_secs = timeout.parse().map_err(|_| {
                Error::invalid_config(format!("VAULT_TIMEOUT is not a number: {}", timeout))
            })?;
        }
        if let Some(role_id) = lookup("APPROLE_ID") {
            cfg.kms.approle.role_id = Some(role_id);
        }
        if let Some(secret_id) = lookup("APPROLE_SECRET_ID") {
            cfg.kms.approle.secret_id = Some(secret_id);
        }
        if let Some(accessor) = lookup("ARSID_ACCESS_KEY") {
            cfg.kms.approle.secret_id_accessor = Some(accessor);
        }
        if let Some(deployment) = lookup("PAGEVAULT_DEPLOYMENT") {
            cfg.deployment = deployment.parse()?;
        }
        if let Some(root) = lookup("PAGEVAULT_ROOT") {
            cfg.storage.root = Utf8PathBuf::from(root);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let cfg = &self.config;
        if cfg.vault.address.trim().is_empty() {
            return Err(Error::invalid_config("vault.address must not be empty"));
        }
        if cfg.kms.data_key_name.trim().is_empty() || cfg.kms.aux_key_name.trim().is_empty() {
            return Err(Error::invalid_config("kms key names must not be empty"));
        }
        if cfg.crypto.domain.is_empty() {
            return Err(Error::invalid_config("crypto.domain must not be empty"));
        }
        if cfg.kms.renewal_margin_secs >= cfg.kms.default_lease_secs {
            return Err(Error::invalid_config(
                "kms.renewal_margin_secs must be shorter than kms.default_lease_secs",
            ));
        }
        Ok(())
    }

    /// Environment-qualified AppRole role name
    pub fn role_name(&self) -> String {
        self.config
            .deployment
            .qualify(&self.config.kms.approle.role_name)
    }

    /// Environment-qualified transit key for data-key generation
    pub fn data_key_name(&self) -> String {
        self.config.deployment.qualify(&self.config.kms.data_key_name)
    }

    /// Environment-qualified transit key for small-blob encryption
    pub fn aux_key_name(&self) -> String {
        self.config.deployment.qualify(&self.config.kms.aux_key_name)
    }

    pub fn blob_layout(&self) -> BlobLayout {
        BlobLayout::new(self.config.storage.root.clone())
    }

    pub fn secret_layout(&self) -> SecretLayout {
        SecretLayout::new(&self.config.secret_store.prefix, self.config.deployment)
    }
}
