//! Mock KMS endpoints
//!
//! Response bodies follow the full Vault response envelope so the typed
//! client can deserialize them.

use super::*;
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Standard response envelope around `data` or `auth`
fn envelope(data: Value, auth: Value) -> Value {
    json!({
        "request_id": "req-1",
        "lease_id": "",
        "lease_duration": 0,
        "renewable": false,
        "data": data,
        "auth": auth,
        "warnings": null,
        "wrap_info": null,
    })
}

fn data(data: Value) -> Value {
    envelope(data, Value::Null)
}

fn auth(token: &str, lease_secs: u64) -> Value {
    envelope(
        Value::Null,
        json!({
            "client_token": token,
            "accessor": "token-accessor",
            "policies": ["default", "notebook"],
            "token_policies": ["default", "notebook"],
            "metadata": { "role_name": ROLE_NAME },
            "lease_duration": lease_secs,
            "renewable": true,
            "entity_id": "entity-1",
            "token_type": "service",
            "orphan": true,
        }),
    )
}

/// `POST /v1/auth/approle/login` returning `token`
pub async fn mock_login(server: &MockServer, secret_id: &str, token: &str, lease_secs: u64) {
    Mock::given(method("POST"))
        .and(path("/v1/auth/approle/login"))
        .and(body_partial_json(json!({ "role_id": ROLE_ID, "secret_id": secret_id })))
        .respond_with(ResponseTemplate::new(200).set_body_json(auth(token, lease_secs)))
        .mount(server)
        .await;
}

/// Any other login attempt is rejected the way Vault rejects bad credentials
pub async fn mock_login_rejected(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v1/auth/approle/login"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "errors": ["invalid role or secret ID"]
        })))
        .with_priority(10)
        .mount(server)
        .await;
}

/// `POST /v1/auth/approle/role/<role>/secret-id`, authorized by the accessor token
pub async fn mock_mint_secret_id(server: &MockServer, secret_id: &str) {
    Mock::given(method("POST"))
        .and(path(format!("/v1/auth/approle/role/{}/secret-id", ROLE_NAME)))
        .and(header("X-Vault-Token", ACCESSOR_TOKEN))
        .respond_with(ResponseTemplate::new(200).set_body_json(data(json!({
            "secret_id": secret_id,
            "secret_id_accessor": "acc-1",
            "secret_id_ttl": 600,
        }))))
        .mount(server)
        .await;
}

pub async fn mock_lookup_self(server: &MockServer, token: &str, ttl: u64) {
    Mock::given(method("GET"))
        .and(path("/v1/auth/token/lookup-self"))
        .and(header("X-Vault-Token", token))
        .respond_with(ResponseTemplate::new(200).set_body_json(data(json!({
            "accessor": "token-accessor",
            "creation_time": 1_700_000_000u64,
            "creation_ttl": 600,
            "display_name": "approle",
            "entity_id": "entity-1",
            "expire_time": null,
            "explicit_max_ttl": 0,
            "id": token,
            "identity_policies": null,
            "issue_time": null,
            "meta": null,
            "num_uses": 0,
            "orphan": true,
            "path": "auth/approle/login",
            "policies": ["default", "notebook"],
            "renewable": true,
            "role": null,
            "ttl": ttl,
        }))))
        .mount(server)
        .await;
}

pub async fn mock_renew(server: &MockServer, old_token: &str, new_token: &str) {
    Mock::given(method("POST"))
        .and(path("/v1/auth/token/renew"))
        .and(header("X-Vault-Token", old_token))
        .and(body_partial_json(json!({ "token": old_token, "increment": "120s" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(auth(new_token, 120)))
        .mount(server)
        .await;
}

pub async fn mock_renew_denied(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v1/auth/token/renew"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "errors": ["permission denied"]
        })))
        .mount(server)
        .await;
}

/// `POST /v1/transit/datakey/plaintext/<key>` bound to `context_b64`
pub async fn mock_datakey(server: &MockServer, context_b64: &str, plaintext_b64: &str, sealed: &str) {
    Mock::given(method("POST"))
        .and(path(format!("/v1/transit/datakey/plaintext/{}", DATA_KEY_NAME)))
        .and(header("X-Vault-Token", SESSION_TOKEN))
        .and(header("X-Vault-Namespace", "pagevault"))
        .and(body_partial_json(json!({ "context": context_b64 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(data(json!({
            "ciphertext": sealed,
            "plaintext": plaintext_b64,
        }))))
        .mount(server)
        .await;
}

/// Transit decrypt that only succeeds for the matching ciphertext and context
pub async fn mock_decrypt_bound(
    server: &MockServer,
    key: &str,
    sealed: &str,
    context_b64: &str,
    plaintext_b64: &str,
) {
    Mock::given(method("POST"))
        .and(path(format!("/v1/transit/decrypt/{}", key)))
        .and(body_partial_json(json!({ "ciphertext": sealed, "context": context_b64 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(data(json!({
            "plaintext": plaintext_b64,
        }))))
        .with_priority(1)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path(format!("/v1/transit/decrypt/{}", key)))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "errors": ["cipher: message authentication failed"]
        })))
        .with_priority(10)
        .mount(server)
        .await;
}

pub async fn mock_encrypt(server: &MockServer, key: &str, plaintext_b64: &str, ciphertext: &str) {
    Mock::given(method("POST"))
        .and(path(format!("/v1/transit/encrypt/{}", key)))
        .and(body_partial_json(json!({ "plaintext": plaintext_b64 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(data(json!({
            "ciphertext": ciphertext,
        }))))
        .mount(server)
        .await;
}

pub async fn mock_transit_unavailable(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(format!("/v1/transit/datakey/plaintext/{}", DATA_KEY_NAME)))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "errors": ["Vault is sealed"]
        })))
        .mount(server)
        .await;
}
