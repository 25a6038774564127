use anyhow::{Result, anyhow};
use base64::Engine;
use chrono::Utc;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde_derive::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::info;

use crate::core::credentials::{CredentialResolver, Platform};
use crate::core::error::EngineError;
use crate::core::storage::{OAuthStateRecord, Storage};
use crate::core::vault::CredentialVault;

/// Static description of a three-legged OAuth2 provider.
#[derive(Debug, Clone)]
pub struct OAuthProvider {
    pub name: &'static str,
    pub auth_url: String,
    pub token_url: String,
    pub scopes: Vec<&'static str>,
    pub scope_separator: &'static str,
    /// Where the app-level client id/secret come from.
    pub app_platform: Platform,
    /// Where the per-user tokens go after a successful exchange.
    pub user_platform: Platform,
}

pub fn provider(name: &str) -> Option<OAuthProvider> {
    match name {
        "twitter" => Some(OAuthProvider {
            name: "twitter",
            auth_url: "https://twitter.com/i/oauth2/authorize".to_string(),
            token_url: "https://api.twitter.com/2/oauth2/token".to_string(),
            // offline.access is required for a refresh token
            scopes: vec!["tweet.read", "tweet.write", "users.read", "offline.access"],
            scope_separator: " ",
            app_platform: Platform::TwitterOauth2App,
            user_platform: Platform::Twitter,
        }),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

pub fn generate_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

pub fn generate_code_verifier() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

/// RFC 7636 S256: BASE64URL-ENCODE(SHA256(ASCII(verifier))), no padding.
pub fn code_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest)
}

pub fn build_auth_url(
    provider: &OAuthProvider,
    client_id: &str,
    redirect_uri: &str,
    state: &str,
    challenge: &str,
) -> String {
    let scopes = provider.scopes.join(provider.scope_separator);

    format!(
        "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}&code_challenge={}&code_challenge_method=S256",
        provider.auth_url,
        urlencoding::encode(client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(&scopes),
        state,
        challenge
    )
}

/// Start the authorization flow for a user: resolve app credentials, mint a
/// state + PKCE verifier, persist them, and return the provider URL to
/// redirect the user-agent to.
pub async fn begin_authorization(
    storage: &Storage,
    resolver: &CredentialResolver,
    provider: &OAuthProvider,
    user_id: &str,
    callback_url: &str,
) -> Result<String> {
    let app = resolver
        .resolve(user_id, provider.app_platform, None)
        .await?;
    let client_id = app
        .get("client_id")
        .ok_or_else(|| anyhow!("app credentials missing client_id"))?;

    let state = generate_state();
    let verifier = generate_code_verifier();
    let challenge = code_challenge(&verifier);

    storage
        .insert_oauth_state(&OAuthStateRecord {
            state: state.clone(),
            code_verifier: verifier,
            user_id: user_id.to_string(),
            provider: provider.name.to_string(),
            created_at: Utc::now(),
        })
        .await?;

    info!(user_id, provider = provider.name, "generated authorization URL");
    Ok(build_auth_url(
        provider,
        client_id,
        callback_url,
        &state,
        &challenge,
    ))
}

/// Finish the flow at the callback: consume the state exactly once, exchange
/// the code with the stored verifier, and persist the per-user tokens.
/// Returns the user id the tokens were stored for.
pub async fn complete_authorization(
    storage: &Storage,
    vault: &CredentialVault,
    resolver: &CredentialResolver,
    provider: &OAuthProvider,
    state: &str,
    code: &str,
    callback_url: &str,
) -> Result<String> {
    let record = storage
        .consume_oauth_state(state)
        .await?
        .ok_or(EngineError::InvalidState)?;
    if record.provider != provider.name {
        return Err(EngineError::InvalidState.into());
    }

    let app = resolver
        .resolve(&record.user_id, provider.app_platform, None)
        .await?;
    let client_id = app
        .get("client_id")
        .ok_or_else(|| anyhow!("app credentials missing client_id"))?;
    let client_secret = app
        .get("client_secret")
        .ok_or_else(|| anyhow!("app credentials missing client_secret"))?;

    let token = exchange_code(
        &provider.token_url,
        code,
        client_id,
        client_secret,
        callback_url,
        &record.code_verifier,
    )
    .await?;

    let access_token = token
        .access_token
        .ok_or_else(|| anyhow!("no access_token in token response"))?;

    let mut fields = HashMap::new();
    fields.insert("access_token".to_string(), access_token);
    if let Some(refresh) = token.refresh_token {
        fields.insert("refresh_token".to_string(), refresh);
    }
    if let Some(expires_in) = token.expires_in {
        fields.insert("expires_in".to_string(), expires_in.to_string());
    }

    vault
        .store_fields(&record.user_id, provider.user_platform, &fields)
        .await?;

    info!(
        user_id = record.user_id,
        provider = provider.name,
        "stored platform tokens after authorization"
    );
    Ok(record.user_id)
}

async fn exchange_code(
    token_url: &str,
    code: &str,
    client_id: &str,
    client_secret: &str,
    redirect_uri: &str,
    code_verifier: &str,
) -> Result<TokenResponse> {
    let client = reqwest::Client::new();

    let params = [
        ("code", code.to_string()),
        ("grant_type", "authorization_code".to_string()),
        ("client_id", client_id.to_string()),
        ("redirect_uri", redirect_uri.to_string()),
        ("code_verifier", code_verifier.to_string()),
    ];

    let response = client
        .post(token_url)
        .basic_auth(client_id, Some(client_secret))
        .form(&params)
        .send()
        .await
        .map_err(|e| anyhow!("HTTP request failed: {}", e))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| anyhow!("Failed to read response body: {}", e))?;

    if !status.is_success() {
        return Err(anyhow!("Token exchange failed (HTTP {}): {}", status, body));
    }

    let token: TokenResponse = serde_json::from_str(&body)
        .map_err(|e| anyhow!("Failed to parse token response: {}", e))?;

    if let Some(error) = token.error {
        let desc = token.error_description.unwrap_or_default();
        return Err(anyhow!("OAuth error: {} - {}", error, desc));
    }

    Ok(token)
}
