use std::collections::HashMap;

use serde_derive::Serialize;
use tracing::debug;

use crate::core::error::EngineError;
use crate::core::vault::CredentialVault;

/// One credential input a platform requires. Drives both the credentials API
/// and the resolver's environment-default mapping.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FieldDescriptor {
    pub key: &'static str,
    pub label: &'static str,
    pub sensitive: bool,
    pub required: bool,
}

const fn field(key: &'static str, label: &'static str) -> FieldDescriptor {
    FieldDescriptor {
        key,
        label,
        sensitive: true,
        required: true,
    }
}

const fn optional_field(key: &'static str, label: &'static str) -> FieldDescriptor {
    FieldDescriptor {
        key,
        label,
        sensitive: true,
        required: false,
    }
}

/// Every platform the engine can hold credentials for, each with its own
/// ordered field set. Adding a platform means adding a variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    OpenAi,
    Anthropic,
    /// Per-user Twitter tokens obtained through the OAuth flow.
    Twitter,
    /// App-level Twitter OAuth2 client credentials.
    TwitterOauth2App,
    NewsApi,
}

impl Platform {
    pub const ALL: &'static [Platform] = &[
        Platform::OpenAi,
        Platform::Anthropic,
        Platform::Twitter,
        Platform::TwitterOauth2App,
        Platform::NewsApi,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Platform::OpenAi => "openai",
            Platform::Anthropic => "anthropic",
            Platform::Twitter => "twitter",
            Platform::TwitterOauth2App => "twitter_oauth2_app",
            Platform::NewsApi => "newsapi",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::OpenAi => "OpenAI",
            Platform::Anthropic => "Anthropic Claude",
            Platform::Twitter => "Twitter / X",
            Platform::TwitterOauth2App => "Twitter OAuth2 App",
            Platform::NewsApi => "NewsAPI",
        }
    }

    pub fn parse(id: &str) -> Option<Platform> {
        Platform::ALL.iter().copied().find(|p| p.id() == id)
    }

    pub fn fields(&self) -> &'static [FieldDescriptor] {
        const API_KEY_ONLY: &[FieldDescriptor] = &[field("api_key", "API Key")];
        const TWITTER_USER: &[FieldDescriptor] = &[
            field("access_token", "Access Token"),
            optional_field("refresh_token", "Refresh Token"),
        ];
        const TWITTER_APP: &[FieldDescriptor] = &[
            field("client_id", "Client ID"),
            field("client_secret", "Client Secret"),
        ];

        match self {
            Platform::OpenAi | Platform::Anthropic | Platform::NewsApi => API_KEY_ONLY,
            Platform::Twitter => TWITTER_USER,
            Platform::TwitterOauth2App => TWITTER_APP,
        }
    }

    /// Environment variable that can supply a field without any stored record.
    fn env_var(&self, field_key: &str) -> Option<&'static str> {
        match (self, field_key) {
            (Platform::OpenAi, "api_key") => Some("OPENAI_API_KEY"),
            (Platform::Anthropic, "api_key") => Some("ANTHROPIC_API_KEY"),
            (Platform::Twitter, "access_token") => Some("TWITTER_ACCESS_TOKEN"),
            (Platform::Twitter, "refresh_token") => Some("TWITTER_REFRESH_TOKEN"),
            (Platform::TwitterOauth2App, "client_id") => Some("TWITTER_CLIENT_ID"),
            (Platform::TwitterOauth2App, "client_secret") => Some("TWITTER_CLIENT_SECRET"),
            (Platform::NewsApi, "api_key") => Some("NEWS_API_KEY"),
            _ => None,
        }
    }
}

type EnvLookup = fn(&str) -> Option<String>;

fn std_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Merges credential sources for a `(user, platform)` pair with fixed
/// precedence: explicit caller-supplied fields, then environment defaults,
/// then the stored encrypted record. Decrypted values live only in the
/// returned map; nothing is cached here.
#[derive(Clone)]
pub struct CredentialResolver {
    vault: CredentialVault,
    env: EnvLookup,
}

impl CredentialResolver {
    pub fn new(vault: CredentialVault) -> Self {
        Self {
            vault,
            env: std_env,
        }
    }

    #[cfg(test)]
    pub fn with_env_lookup(vault: CredentialVault, env: EnvLookup) -> Self {
        Self { vault, env }
    }

    pub async fn resolve(
        &self,
        user_id: &str,
        platform: Platform,
        explicit: Option<&HashMap<String, String>>,
    ) -> Result<HashMap<String, String>, EngineError> {
        let stored = self
            .vault
            .load_fields(user_id, platform)
            .await
            .map_err(|e| {
                debug!(platform = platform.id(), "credential record load failed: {e}");
                EngineError::ConfigurationError {
                    platform: platform.id().to_string(),
                    field: "stored record".to_string(),
                }
            })?;

        let mut resolved = HashMap::new();
        for descriptor in platform.fields() {
            let value = explicit
                .and_then(|fields| fields.get(descriptor.key).cloned())
                .or_else(|| platform.env_var(descriptor.key).and_then(|var| (self.env)(var)))
                .or_else(|| {
                    stored
                        .as_ref()
                        .and_then(|fields| fields.get(descriptor.key).cloned())
                });

            match value {
                Some(v) => {
                    resolved.insert(descriptor.key.to_string(), v);
                }
                None if descriptor.required => {
                    return Err(EngineError::ConfigurationError {
                        platform: platform.id().to_string(),
                        field: descriptor.key.to_string(),
                    });
                }
                None => {}
            }
        }

        // Stored records may carry extra fields beyond the catalog (e.g.
        // provider-specific token metadata); pass them through untouched.
        if let Some(fields) = stored {
            for (key, value) in fields {
                resolved.entry(key).or_insert(value);
            }
        }

        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::Storage;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn twitter_app_env(name: &str) -> Option<String> {
        match name {
            "TWITTER_CLIENT_ID" => Some("env-client-id".to_string()),
            "TWITTER_CLIENT_SECRET" => Some("env-client-secret".to_string()),
            _ => None,
        }
    }

    fn resolver(env: EnvLookup) -> (CredentialResolver, CredentialVault) {
        let vault = CredentialVault::new(Storage::open_in_memory().unwrap());
        (
            CredentialResolver::with_env_lookup(vault.clone(), env),
            vault,
        )
    }

    #[tokio::test]
    async fn env_only_lookup_yields_env_value() {
        let (resolver, _) = resolver(twitter_app_env);
        let fields = resolver
            .resolve("u1", Platform::TwitterOauth2App, None)
            .await
            .unwrap();
        assert_eq!(fields["client_id"], "env-client-id");
        assert_eq!(fields["client_secret"], "env-client-secret");
    }

    #[tokio::test]
    async fn explicit_fields_beat_env_and_stored() {
        let (resolver, vault) = resolver(twitter_app_env);
        let mut stored = HashMap::new();
        stored.insert("client_id".to_string(), "stored-id".to_string());
        stored.insert("client_secret".to_string(), "stored-secret".to_string());
        vault
            .store_fields("u1", Platform::TwitterOauth2App, &stored)
            .await
            .unwrap();

        let mut explicit = HashMap::new();
        explicit.insert("client_id".to_string(), "explicit-id".to_string());

        let fields = resolver
            .resolve("u1", Platform::TwitterOauth2App, Some(&explicit))
            .await
            .unwrap();
        assert_eq!(fields["client_id"], "explicit-id");
        // no explicit secret, falls through to env before stored
        assert_eq!(fields["client_secret"], "env-client-secret");
    }

    #[tokio::test]
    async fn stored_record_used_when_no_env() {
        let (resolver, vault) = resolver(no_env);
        let mut stored = HashMap::new();
        stored.insert("api_key".to_string(), "sk-stored".to_string());
        vault
            .store_fields("u1", Platform::OpenAi, &stored)
            .await
            .unwrap();

        let fields = resolver.resolve("u1", Platform::OpenAi, None).await.unwrap();
        assert_eq!(fields["api_key"], "sk-stored");
    }

    #[tokio::test]
    async fn missing_required_field_is_configuration_error() {
        let (resolver, _) = resolver(no_env);
        let err = resolver
            .resolve("u1", Platform::OpenAi, None)
            .await
            .unwrap_err();
        match err {
            EngineError::ConfigurationError { platform, field } => {
                assert_eq!(platform, "openai");
                assert_eq!(field, "api_key");
            }
            other => panic!("expected ConfigurationError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn optional_fields_may_be_absent() {
        let (resolver, vault) = resolver(no_env);
        let mut stored = HashMap::new();
        stored.insert("access_token".to_string(), "tok".to_string());
        vault
            .store_fields("u1", Platform::Twitter, &stored)
            .await
            .unwrap();

        let fields = resolver
            .resolve("u1", Platform::Twitter, None)
            .await
            .unwrap();
        assert_eq!(fields["access_token"], "tok");
        assert!(!fields.contains_key("refresh_token"));
    }

    #[tokio::test]
    async fn extra_stored_fields_pass_through() {
        let (resolver, vault) = resolver(no_env);
        let mut stored = HashMap::new();
        stored.insert("access_token".to_string(), "tok".to_string());
        stored.insert("token_type".to_string(), "bearer".to_string());
        vault
            .store_fields("u1", Platform::Twitter, &stored)
            .await
            .unwrap();

        let fields = resolver
            .resolve("u1", Platform::Twitter, None)
            .await
            .unwrap();
        assert_eq!(fields["token_type"], "bearer");
    }

    #[test]
    fn platform_parse_roundtrip() {
        for platform in Platform::ALL {
            assert_eq!(Platform::parse(platform.id()), Some(*platform));
        }
        assert_eq!(Platform::parse("myspace"), None);
    }

    #[test]
    fn field_catalogs_are_stable_per_platform() {
        let keys = |p: Platform| p.fields().iter().map(|f| f.key).collect::<Vec<_>>();
        assert_eq!(keys(Platform::OpenAi), vec!["api_key"]);
        assert_eq!(keys(Platform::NewsApi), vec!["api_key"]);
        assert_eq!(keys(Platform::Twitter), vec!["access_token", "refresh_token"]);
        assert_eq!(
            keys(Platform::TwitterOauth2App),
            vec!["client_id", "client_secret"]
        );

        for platform in Platform::ALL {
            assert!(!platform.fields().is_empty());
        }
        // refresh_token is the one optional field in the catalog
        let refresh = Platform::Twitter
            .fields()
            .iter()
            .find(|f| f.key == "refresh_token")
            .unwrap();
        assert!(!refresh.required);
    }
}
