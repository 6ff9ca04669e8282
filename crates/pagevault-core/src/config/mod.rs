//! Configuration loading

mod loader;
mod types;

pub use loader::PagevaultConfig;
pub use types::{
    AppRoleConfig, CryptoConfig, KmsConfig, PagevaultConfigFile, SecretStoreConfig,
    StorageConfig, VaultConnectionConfig,
};
