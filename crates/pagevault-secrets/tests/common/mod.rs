//! Shared helpers for pagevault-secrets integration tests

#![allow(dead_code)]

pub mod mock_kms;

use pagevault_secrets::kms::{AppRoleCredentials, KmsClientConfig, SessionHandle, VaultKmsClient};
use std::time::Duration;

pub const ROLE_ID: &str = "role-1234";
pub const SECRET_ID: &str = "secret-5678";
pub const ACCESSOR_TOKEN: &str = "s.accessor";
pub const SESSION_TOKEN: &str = "s.session";
pub const ROLE_NAME: &str = "notebook-dev";
pub const DATA_KEY_NAME: &str = "notebook";
pub const AUX_KEY_NAME: &str = "notebook-aux";

/// Client configuration pointing at a mock server
pub fn client_config(address: &str) -> KmsClientConfig {
    KmsClientConfig {
        address: address.to_string(),
        namespace: Some("pagevault".to_string()),
        transit_mount: "transit".to_string(),
        data_key_name: DATA_KEY_NAME.to_string(),
        aux_key_name: AUX_KEY_NAME.to_string(),
        approle: AppRoleCredentials {
            mount: "approle".to_string(),
            role_name: ROLE_NAME.to_string(),
            role_id: Some(ROLE_ID.to_string()),
            secret_id: Some(SECRET_ID.to_string()),
            secret_id_accessor: None,
        },
        renew_increment: Duration::from_secs(120),
        timeout: Duration::from_secs(5),
    }
}

pub fn client(config: KmsClientConfig) -> VaultKmsClient {
    VaultKmsClient::new(config, SessionHandle::new()).unwrap()
}
