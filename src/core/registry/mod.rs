use anyhow::Result;
use async_trait::async_trait;
use serde_derive::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::credentials::Platform;
use crate::core::error::EngineError;

/// Identity of one invocable capability. Immutable after registry
/// construction.
#[derive(Debug, Clone)]
pub struct ModuleDescriptor {
    pub category: String,
    pub module: String,
    pub function: String,
    pub description: String,
    pub signature: String,
}

impl ModuleDescriptor {
    pub fn new(
        category: &str,
        module: &str,
        function: &str,
        description: &str,
        signature: &str,
    ) -> Self {
        Self {
            category: category.to_string(),
            module: module.to_string(),
            function: function.to_string(),
            description: description.to_string(),
            signature: signature.to_string(),
        }
    }

    pub fn path(&self) -> String {
        format!("{}.{}.{}", self.category, self.module, self.function)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub path: String,
    pub description: String,
    pub signature: String,
}

/// Everything a handler gets for one call: the resolved parameter values
/// (bindings already substituted), the decrypted credentials for the step's
/// platform, and the free-form run context (e.g. the raw chat input).
pub struct Invocation {
    pub params: serde_json::Map<String, serde_json::Value>,
    pub credentials: HashMap<String, String>,
    pub context: Option<String>,
}

impl Invocation {
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    pub fn credential(&self, key: &str) -> Result<&str> {
        self.credentials
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| anyhow::anyhow!("missing '{key}' credential"))
    }
}

#[async_trait]
pub trait ModuleHandler: Send + Sync {
    /// Credential scope of this capability; `None` means no credentials.
    fn platform(&self) -> Option<Platform> {
        None
    }

    /// Whether invoking this module changes state outside the process.
    /// Side-effecting modules are replaced by `dry_run` in dry-run mode.
    fn side_effecting(&self) -> bool {
        false
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<serde_json::Value>;

    /// Synthetic success result, shaped like the real output so downstream
    /// bindings keep resolving. Only called for side-effecting modules.
    async fn dry_run(&self, invocation: &Invocation) -> Result<serde_json::Value> {
        let _ = invocation;
        Ok(serde_json::json!({ "dry_run": true }))
    }
}

struct RegisteredModule {
    descriptor: ModuleDescriptor,
    handler: Arc<dyn ModuleHandler>,
}

/// Process-wide capability catalog: built once at startup, read-only
/// afterwards. Search scans entries in declaration order.
pub struct ModuleRegistry {
    entries: Vec<RegisteredModule>,
    index: HashMap<String, usize>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn register(&mut self, descriptor: ModuleDescriptor, handler: Arc<dyn ModuleHandler>) {
        let path = descriptor.path();
        self.index.insert(path, self.entries.len());
        self.entries.push(RegisteredModule {
            descriptor,
            handler,
        });
    }

    /// Case-insensitive substring match over `path + description + signature`,
    /// first-match order. Deliberately unweighted.
    pub fn search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        let query = query.to_lowercase();
        let mut results = Vec::new();

        for entry in &self.entries {
            let descriptor = &entry.descriptor;
            let haystack = format!(
                "{} {} {}",
                descriptor.path(),
                descriptor.description,
                descriptor.signature
            )
            .to_lowercase();

            if haystack.contains(&query) {
                results.push(SearchHit {
                    path: descriptor.path(),
                    description: descriptor.description.clone(),
                    signature: descriptor.signature.clone(),
                });
                if results.len() >= limit {
                    break;
                }
            }
        }
        results
    }

    pub fn resolve(
        &self,
        path: &str,
    ) -> Result<(&ModuleDescriptor, Arc<dyn ModuleHandler>), EngineError> {
        match self.index.get(path) {
            Some(&i) => {
                let entry = &self.entries[i];
                Ok((&entry.descriptor, Arc::clone(&entry.handler)))
            }
            None => Err(EngineError::NotFound(path.to_string())),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl ModuleHandler for Echo {
        async fn invoke(&self, invocation: &Invocation) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Object(invocation.params.clone()))
        }
    }

    fn sample_registry() -> ModuleRegistry {
        let mut registry = ModuleRegistry::new();
        registry.register(
            ModuleDescriptor::new(
                "twitter",
                "tweets",
                "search",
                "Search recent tweets matching a query",
                "(query: string, max_results?: number)",
            ),
            Arc::new(Echo),
        );
        registry.register(
            ModuleDescriptor::new(
                "twitter",
                "tweets",
                "post",
                "Post a new tweet",
                "(text: string)",
            ),
            Arc::new(Echo),
        );
        registry.register(
            ModuleDescriptor::new(
                "ai",
                "text",
                "generate",
                "Generate text from a prompt",
                "(prompt: string, system?: string)",
            ),
            Arc::new(Echo),
        );
        registry
    }

    #[test]
    fn search_by_own_path_with_limit_one_returns_exactly_that_module() {
        let registry = sample_registry();
        let hits = registry.search("twitter.tweets.post", 1);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "twitter.tweets.post");
    }

    #[test]
    fn search_is_case_insensitive_and_matches_descriptions() {
        let registry = sample_registry();
        let hits = registry.search("SEARCH RECENT", 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "twitter.tweets.search");
    }

    #[test]
    fn search_matches_signatures() {
        let registry = sample_registry();
        let hits = registry.search("max_results", 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "twitter.tweets.search");
    }

    #[test]
    fn search_returns_declaration_order_and_respects_limit() {
        let registry = sample_registry();
        let hits = registry.search("twitter", 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].path, "twitter.tweets.search");
        assert_eq!(hits[1].path, "twitter.tweets.post");

        let capped = registry.search("twitter", 1);
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].path, "twitter.tweets.search");
    }

    #[test]
    fn empty_query_matches_everything() {
        let registry = sample_registry();
        assert_eq!(registry.search("", 10).len(), registry.len());
    }

    #[test]
    fn resolve_unknown_path_is_not_found() {
        let registry = sample_registry();
        assert!(registry.resolve("twitter.tweets.search").is_ok());
        match registry.resolve("twitter.tweets.delete") {
            Err(EngineError::NotFound(path)) => assert_eq!(path, "twitter.tweets.delete"),
            other => panic!("expected NotFound, got {:?}", other.map(|_| ())),
        }
    }
}
