//! Wires the write coordinator to its KMS and secret store

use anyhow::{bail, Context, Result};
use camino::Utf8PathBuf;
use pagevault_core::{BlobLayout, PagevaultConfig};
use pagevault_secrets::{
    spawn_renewal, KmsClientConfig, LocalKms, MemorySecretStore, RenewalOutcome, RenewalPolicy,
    RenewalTask, SessionHandle, SessionStatus, VaultKmsClient, VaultSecretStore,
};
use pagevault_storage::{CoordinatorSettings, RecoveryReport, WriteCoordinator};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing::{info, warn};

use crate::output;

/// Flags shared by every command
#[derive(Debug, Clone, Default)]
pub struct GlobalOpts {
    pub config: Option<Utf8PathBuf>,
    pub local: bool,
    pub quiet: bool,
}

/// A connected coordinator plus the session machinery keeping it alive
pub struct Runtime {
    pub config: PagevaultConfig,
    pub coordinator: WriteCoordinator,
    session: Option<SessionHandle>,
    renewal: Option<RenewalTask>,
    /// Blob root of a local run; removed on drop
    _scratch: Option<TempDir>,
}

impl Runtime {
    /// Load configuration, log in to the KMS and start session renewal
    pub async fn start(opts: &GlobalOpts) -> Result<Self> {
        let config =
            PagevaultConfig::load(opts.config.as_deref()).context("Failed to load configuration")?;
        let settings = CoordinatorSettings::from_config(&config);

        if opts.local {
            return Self::local(config, settings, opts.quiet);
        }

        let cfg = &config.config;
        let session = SessionHandle::new();
        let kms = Arc::new(
            VaultKmsClient::new(KmsClientConfig::from_config(&config), session.clone())
                .context("Failed to create KMS client")?,
        );

        let spinner = output::spinner("Authenticating with KMS...");
        let login = kms.login().await;
        spinner.finish_and_clear();
        login.with_context(|| format!("KMS login failed as role '{}'", config.role_name()))?;

        let policy = RenewalPolicy::new(
            Duration::from_secs(cfg.kms.renewal_margin_secs),
            Duration::from_secs(cfg.kms.default_lease_secs),
            cfg.deployment,
        );
        let renewal = spawn_renewal(kms.clone(), policy);

        let store = Arc::new(VaultSecretStore::new(
            cfg.vault.address.clone(),
            cfg.vault.namespace.clone(),
            cfg.vault.timeout(),
            cfg.secret_store.mount.clone(),
            session.clone(),
        ));

        let coordinator = WriteCoordinator::new(kms, store, settings);
        Ok(Self {
            config,
            coordinator,
            session: Some(session),
            renewal: Some(renewal),
            _scratch: None,
        })
    }

    /// In-memory KMS and secret store over a scratch blob root.
    ///
    /// The configured storage root is never used: its blobs have envelopes
    /// in the real store, so a sweep against an empty store would delete
    /// them all.
    fn local(
        config: PagevaultConfig,
        mut settings: CoordinatorSettings,
        quiet: bool,
    ) -> Result<Self> {
        if config.config.deployment.is_production() {
            bail!("--local is not available in production deployments");
        }

        let scratch = tempfile::Builder::new()
            .prefix("pagevault-local-")
            .tempdir()
            .context("Failed to create scratch storage root")?;
        let root = Utf8PathBuf::from_path_buf(scratch.path().to_path_buf())
            .map_err(|p| anyhow::anyhow!("Scratch directory is not UTF-8: {}", p.display()))?;
        settings.blobs = BlobLayout::new(root);

        if !quiet {
            output::warning(
                "Using an in-memory KMS and secret store over a scratch directory; everything is lost on exit",
            );
        }

        let kms = Arc::new(LocalKms::new(config.data_key_name()));
        let store = Arc::new(MemorySecretStore::new());
        Ok(Self {
            config,
            coordinator: WriteCoordinator::new(kms, store, settings),
            session: None,
            renewal: None,
            _scratch: Some(scratch),
        })
    }

    /// Run the reconciliation sweep before serving a request
    pub async fn recover_on_startup(&self) -> Result<RecoveryReport> {
        let report = self
            .coordinator
            .recover()
            .await
            .context("Startup recovery failed")?;
        if !report.is_clean() {
            info!(repairs = report.repairs(), "Startup recovery repaired storage");
            for skipped in &report.skipped {
                warn!("Recovery skipped {}", skipped);
            }
        }
        Ok(report)
    }

    /// `None` in local mode
    pub async fn session_status(&self) -> Option<SessionStatus> {
        match &self.session {
            Some(session) => Some(session.status().await),
            None => None,
        }
    }

    /// Stop renewal and forget the session token
    pub async fn shutdown(self) {
        if let Some(renewal) = self.renewal {
            if let RenewalOutcome::Degraded(reason) = renewal.shutdown().await {
                warn!("KMS session was degraded: {}", reason);
            }
        }
        if let Some(session) = self.session {
            session.clear().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagevault_core::config::PagevaultConfigFile;
    use pagevault_core::ResourceId;

    #[tokio::test]
    async fn test_local_mode_leaves_configured_root_alone() {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let mut file = PagevaultConfigFile::default();
        file.storage.root = root.clone();
        let config = PagevaultConfig::from_file(file).unwrap();

        // A committed blob whose envelope lives in the real store
        let p1 = ResourceId::new("nb1", "p1").unwrap();
        let existing = config.blob_layout().blob_path(&p1);
        std::fs::create_dir_all(existing.parent().unwrap()).unwrap();
        std::fs::write(&existing, b"sealed content").unwrap();

        let settings = CoordinatorSettings::from_config(&config);
        let runtime = Runtime::local(config, settings, true).unwrap();
        assert_ne!(runtime.coordinator.blob_layout().root(), root.as_path());

        let report = runtime.recover_on_startup().await.unwrap();
        assert!(report.is_clean(), "{:?}", report);
        assert!(existing.exists());

        let scratch = runtime.coordinator.blob_layout().root().to_path_buf();
        runtime.shutdown().await;
        assert!(!scratch.exists());
    }

    #[test]
    fn test_local_mode_refused_in_production() {
        let mut file = PagevaultConfigFile::default();
        file.deployment = pagevault_core::Deployment::Production;
        let config = PagevaultConfig::from_file(file).unwrap();
        let settings = CoordinatorSettings::from_config(&config);
        assert!(Runtime::local(config, settings, true).is_err());
    }
}
