//! Status command

use anyhow::{Context, Result};
use pagevault_core::PagevaultConfig;
use pagevault_secrets::SessionStatus;
use serde_json::json;

use crate::cli::StatusArgs;
use crate::output;
use crate::runtime::{GlobalOpts, Runtime};

pub async fn run(args: StatusArgs, opts: &GlobalOpts) -> Result<()> {
    let config =
        PagevaultConfig::load(opts.config.as_deref()).context("Failed to load configuration")?;

    // A failed login is reported, not fatal
    let (session, login_error) = match Runtime::start(opts).await {
        Ok(runtime) => {
            let status = runtime.session_status().await;
            runtime.shutdown().await;
            (status, None)
        }
        Err(e) => (None, Some(format!("{:#}", e))),
    };

    if args.json {
        let value = status_json(&config, opts, session.as_ref(), login_error.as_deref());
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let cfg = &config.config;
    output::header("Configuration");
    output::kv(
        "Config file",
        config.config_path.as_ref().map_or("none (defaults)", |p| p.as_str()),
    );
    output::kv("Deployment", &cfg.deployment.to_string());
    output::kv("Storage root", cfg.storage.root.as_str());
    output::kv("Vault address", &cfg.vault.address);
    output::kv("Namespace", cfg.vault.namespace.as_deref().unwrap_or("none"));
    output::kv("AppRole role", &config.role_name());
    output::kv("Transit mount", &cfg.kms.transit_mount);
    output::kv("Data key", &config.data_key_name());
    output::kv("Auxiliary key", &config.aux_key_name());
    output::kv("Envelope prefix", config.secret_layout().prefix());

    output::header("KMS session");
    match (&session, &login_error) {
        (_, Some(err)) => output::error(&format!("Not authenticated: {}", err)),
        (None, None) => output::kv("Mode", "local (in-memory)"),
        (Some(status), None) => {
            output::kv("Authenticated", &status.authenticated.to_string());
            output::kv("Renewable", &status.renewable.to_string());
            output::kv(
                "Lease remaining",
                &status
                    .remaining
                    .map_or("unknown".to_string(), |d| format!("{}s", d.as_secs())),
            );
            if status.degraded {
                output::warning("Session renewal failed; requests may be rejected");
            }
        }
    }
    Ok(())
}

fn status_json(
    config: &PagevaultConfig,
    opts: &GlobalOpts,
    session: Option<&SessionStatus>,
    login_error: Option<&str>,
) -> serde_json::Value {
    let cfg = &config.config;
    json!({
        "config_path": config.config_path.as_ref().map(|p| p.as_str()),
        "deployment": cfg.deployment.to_string(),
        "storage_root": cfg.storage.root.as_str(),
        "vault_address": cfg.vault.address,
        "namespace": cfg.vault.namespace,
        "role_name": config.role_name(),
        "transit_mount": cfg.kms.transit_mount,
        "data_key_name": config.data_key_name(),
        "aux_key_name": config.aux_key_name(),
        "envelope_prefix": config.secret_layout().prefix(),
        "local": opts.local,
        "session": session.map(|s| json!({
            "authenticated": s.authenticated,
            "renewable": s.renewable,
            "remaining_secs": s.remaining.map(|d| d.as_secs()),
            "degraded": s.degraded,
        })),
        "login_error": login_error,
    })
}
