//! Transit-engine KMS client with AppRole authentication
//!
//! | Operation | Vault API |
//! |---|---|
//! | login | `auth::approle::login` |
//! | mint secret id | `auth::approle::role::secret::generate` |
//! | lease lookup | `token::lookup_self` |
//! | renew | `token::renew` |
//! | data key | `transit::generate::data_key` (plaintext) |
//! | encrypt / decrypt | `transit::data::{encrypt, decrypt}` |

use super::renewal::SessionRenewer;
use super::session::{Session, SessionHandle, SessionToken};
use super::KeyManagement;
use crate::error::KmsError;
use crate::keys::{DataKey, GeneratedDataKey, KeyContext, SealedDataKey};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use pagevault_core::PagevaultConfig;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};
use vaultrs::api::transit::requests::{DataKeyType, DecryptDataRequest, GenerateDataKeyRequest};
use vaultrs::api::AuthInfo;
use vaultrs::client::{Client, VaultClient, VaultClientSettingsBuilder};
use vaultrs::error::ClientError;
use vaultrs::{auth::approle, token, transit};
use zeroize::{Zeroize, Zeroizing};

/// AppRole login material
#[derive(Clone, Default)]
pub struct AppRoleCredentials {
    pub mount: String,
    /// Environment-qualified role name
    pub role_name: String,
    pub role_id: Option<String>,
    /// Used directly when set; otherwise minted with the accessor token
    pub secret_id: Option<String>,
    /// Short-lived token allowed to mint secret ids for the role
    pub secret_id_accessor: Option<String>,
}

impl fmt::Debug for AppRoleCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppRoleCredentials")
            .field("mount", &self.mount)
            .field("role_name", &self.role_name)
            .field("role_id", &self.role_id.as_ref().map(|_| "[REDACTED]"))
            .field("secret_id", &self.secret_id.as_ref().map(|_| "[REDACTED]"))
            .field(
                "secret_id_accessor",
                &self.secret_id_accessor.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct KmsClientConfig {
    pub address: String,
    pub namespace: Option<String>,
    pub transit_mount: String,
    /// Key used for data-key generation and unsealing
    pub data_key_name: String,
    /// Key used for small-blob encrypt/decrypt
    pub aux_key_name: String,
    pub approle: AppRoleCredentials,
    pub renew_increment: Duration,
    pub timeout: Duration,
}

impl KmsClientConfig {
    pub fn from_config(config: &PagevaultConfig) -> Self {
        let cfg = &config.config;
        Self {
            address: cfg.vault.address.clone(),
            namespace: cfg.vault.namespace.clone(),
            transit_mount: cfg.kms.transit_mount.clone(),
            data_key_name: config.data_key_name(),
            aux_key_name: config.aux_key_name(),
            approle: AppRoleCredentials {
                mount: cfg.kms.approle.mount.clone(),
                role_name: config.role_name(),
                role_id: cfg.kms.approle.role_id.clone(),
                secret_id: cfg.kms.approle.secret_id.clone(),
                secret_id_accessor: cfg.kms.approle.secret_id_accessor.clone(),
            },
            renew_increment: Duration::from_secs(cfg.kms.renew_increment_secs),
            timeout: cfg.vault.timeout(),
        }
    }
}

/// KMS client backed by a Vault transit engine
pub struct VaultKmsClient {
    config: KmsClientConfig,
    session: SessionHandle,
}

impl VaultKmsClient {
    pub fn new(config: KmsClientConfig, session: SessionHandle) -> Result<Self, KmsError> {
        let client = Self { config, session };
        // Reject an unusable address up front rather than on first use
        client.vault_client(None)?;
        Ok(client)
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn config(&self) -> &KmsClientConfig {
        &self.config
    }

    /// Build a client for one call, carrying `token` when given.
    ///
    /// Created per call so a renewed token is picked up immediately.
    fn vault_client(&self, token: Option<&SessionToken>) -> Result<VaultClient, KmsError> {
        let mut settings = VaultClientSettingsBuilder::default();
        settings.address(&self.config.address);
        settings.timeout(Some(self.config.timeout));
        if let Some(ns) = &self.config.namespace {
            settings.namespace(Some(ns.clone()));
        }

        let settings = settings
            .build()
            .map_err(|e| KmsError::Unavailable(format!("invalid KMS client settings: {}", e)))?;
        let mut client = VaultClient::new(settings).map_err(client_error)?;
        client.set_token(token.map_or("", |t| t.expose()));
        Ok(client)
    }

    async fn authed_client(&self) -> Result<VaultClient, KmsError> {
        let token = self.session.token().await?;
        self.vault_client(Some(&token))
    }

    /// Bound a Vault call by the configured timeout
    async fn call<T>(
        &self,
        request: impl Future<Output = Result<T, ClientError>>,
    ) -> Result<T, KmsError> {
        tokio::time::timeout(self.config.timeout, request)
            .await
            .map_err(|_| KmsError::Timeout(self.config.timeout))?
            .map_err(client_error)
    }

    /// Exchange the AppRole role id and secret id for a session token.
    ///
    /// Without a configured secret id, one is minted first using the
    /// accessor token.
    pub async fn login(&self) -> Result<Session, KmsError> {
        let approle = &self.config.approle;
        let role_id = approle
            .role_id
            .as_deref()
            .ok_or_else(|| KmsError::Auth("AppRole role id is not configured".to_string()))?;

        let secret_id = match &approle.secret_id {
            Some(id) => Zeroizing::new(id.clone()),
            None => self.mint_secret_id().await?,
        };

        let client = self.vault_client(None)?;
        let auth = self
            .call(approle::login(&client, &approle.mount, role_id, &secret_id))
            .await
            .map_err(as_auth_error)?;

        let session = session_from_auth(auth);
        self.session.install(session.clone()).await;

        info!(
            role = %approle.role_name,
            renewable = session.renewable(),
            "Authenticated with KMS"
        );
        Ok(session)
    }

    async fn mint_secret_id(&self) -> Result<Zeroizing<String>, KmsError> {
        let approle = &self.config.approle;
        let accessor = approle.secret_id_accessor.as_ref().ok_or_else(|| {
            KmsError::Auth(
                "neither an AppRole secret id nor a secret-id accessor token is configured"
                    .to_string(),
            )
        })?;

        let client = self.vault_client(Some(&SessionToken::new(accessor.clone())))?;
        let mut response = self
            .call(approle::role::secret::generate(
                &client,
                &approle.mount,
                &approle.role_name,
                None,
            ))
            .await
            .map_err(as_auth_error)?;

        debug!(role = %approle.role_name, "Minted AppRole secret id");
        let secret_id = Zeroizing::new(response.secret_id.clone());
        response.secret_id.zeroize();
        Ok(secret_id)
    }

    /// Remaining TTL of the current token; `None` if the token has no TTL
    pub async fn lookup_session(&self) -> Result<Option<Duration>, KmsError> {
        let client = self.authed_client().await?;
        let response = self.call(token::lookup_self(&client)).await?;
        Ok((response.ttl > 0).then(|| Duration::from_secs(response.ttl)))
    }

    /// Extend the token lease and swap the returned token into the session
    pub async fn renew_session(&self) -> Result<Session, KmsError> {
        let current = self
            .session
            .token()
            .await
            .map_err(|e| KmsError::Renewal(e.to_string()))?;
        let client = self
            .vault_client(Some(&current))
            .map_err(|e| KmsError::Renewal(e.to_string()))?;

        let increment = format!("{}s", self.config.renew_increment.as_secs());
        let auth = self
            .call(token::renew(&client, current.expose(), Some(increment.as_str())))
            .await
            .map_err(|e| KmsError::Renewal(e.to_string()))?;

        let session = session_from_auth(auth);
        self.session.install(session.clone()).await;
        debug!(lease = ?session.lease(), "Renewed KMS session");
        Ok(session)
    }
}

#[async_trait]
impl KeyManagement for VaultKmsClient {
    async fn generate_data_key(&self, context: &KeyContext) -> Result<GeneratedDataKey, KmsError> {
        let client = self.authed_client().await?;
        let mut options = GenerateDataKeyRequest::builder();
        options.context(BASE64.encode(context.to_json()));

        let mut response = self
            .call(transit::generate::data_key(
                &client,
                &self.config.transit_mount,
                &self.config.data_key_name,
                DataKeyType::Plaintext,
                Some(&mut options),
            ))
            .await?;

        let mut encoded = response
            .plaintext
            .take()
            .ok_or_else(|| KmsError::Malformed("data key response has no plaintext".to_string()))?;
        let plaintext = decode_data_key(&encoded);
        encoded.zeroize();

        Ok(GeneratedDataKey {
            plaintext: plaintext?,
            sealed: SealedDataKey::new(response.ciphertext),
        })
    }

    async fn unseal_data_key(
        &self,
        sealed: &SealedDataKey,
        context: &KeyContext,
    ) -> Result<DataKey, KmsError> {
        let client = self.authed_client().await?;
        let mut options = DecryptDataRequest::builder();
        options.context(BASE64.encode(context.to_json()));

        let mut response = self
            .call(transit::data::decrypt(
                &client,
                &self.config.transit_mount,
                &self.config.data_key_name,
                sealed.as_str(),
                Some(&mut options),
            ))
            .await?;

        let key = decode_data_key(&response.plaintext);
        response.plaintext.zeroize();
        key
    }

    async fn encrypt(&self, key_id: &str, plaintext: &[u8]) -> Result<String, KmsError> {
        let client = self.authed_client().await?;
        let encoded = Zeroizing::new(BASE64.encode(plaintext));
        let response = self
            .call(transit::data::encrypt(
                &client,
                &self.config.transit_mount,
                key_id,
                &encoded,
                None,
            ))
            .await?;
        Ok(response.ciphertext)
    }

    async fn decrypt(&self, key_id: &str, ciphertext: &str) -> Result<Vec<u8>, KmsError> {
        let client = self.authed_client().await?;
        let mut response = self
            .call(transit::data::decrypt(
                &client,
                &self.config.transit_mount,
                key_id,
                ciphertext,
                None,
            ))
            .await?;

        let plaintext = BASE64
            .decode(&response.plaintext)
            .map_err(|e| KmsError::Malformed(format!("plaintext is not base64: {}", e)));
        response.plaintext.zeroize();
        plaintext
    }

    fn name(&self) -> &'static str {
        "vault-transit"
    }
}

#[async_trait]
impl SessionRenewer for VaultKmsClient {
    async fn lease_remaining(&self) -> Result<Option<Duration>, KmsError> {
        self.lookup_session().await
    }

    async fn renew(&self) -> Result<(), KmsError> {
        self.renew_session().await.map(|_| ())
    }

    fn mark_degraded(&self) {
        self.session.mark_degraded();
    }
}

fn session_from_auth(mut auth: AuthInfo) -> Session {
    let lease = (auth.lease_duration > 0).then(|| Duration::from_secs(auth.lease_duration));
    let session = Session::new(
        SessionToken::new(auth.client_token.clone()),
        lease,
        auth.renewable,
    );
    auth.client_token.zeroize();
    session
}

fn decode_data_key(encoded: &str) -> Result<DataKey, KmsError> {
    let bytes = Zeroizing::new(
        BASE64
            .decode(encoded)
            .map_err(|e| KmsError::Malformed(format!("data key is not base64: {}", e)))?,
    );
    DataKey::from_slice(&bytes).ok_or_else(|| {
        KmsError::Malformed(format!("data key must be 32 bytes, got {}", bytes.len()))
    })
}

/// Login and secret-id minting treat any rejection as bad credentials
fn as_auth_error(err: KmsError) -> KmsError {
    match err {
        KmsError::Rejected { status, message } => {
            KmsError::Auth(format!("HTTP {}: {}", status, message))
        }
        other => other,
    }
}

fn client_error(err: ClientError) -> KmsError {
    match err {
        ClientError::APIError { code, errors } => status_error(code, errors.join("; ")),
        ClientError::RestClientError { .. } | ClientError::RestClientBuildError { .. } => {
            KmsError::Unavailable(err.to_string())
        }
        other => KmsError::Malformed(other.to_string()),
    }
}

fn status_error(code: u16, message: String) -> KmsError {
    match code {
        401 | 403 => KmsError::Auth(format!("HTTP {}: {}", code, message)),
        400 if message.contains("authentication failed") => KmsError::AuthMismatch,
        429 | 500..=599 => KmsError::Unavailable(format!("HTTP {}: {}", code, message)),
        _ => KmsError::Rejected {
            status: code,
            message,
        },
    }
}
