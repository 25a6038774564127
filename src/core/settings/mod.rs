use anyhow::Result;
use std::collections::HashMap;

use crate::core::storage::Storage;

/// Settings for a scheduled job live in the flat `app_settings` table under
/// `{job}_{key}` keys. Values written as JSON decode to their typed form;
/// anything that fails to parse is kept as the raw string.
pub async fn load_job_settings(
    storage: &Storage,
    job_name: &str,
) -> Result<HashMap<String, serde_json::Value>> {
    let prefix = format!("{job_name}_");
    let mut settings = HashMap::new();

    for (key, value) in storage.all_settings().await? {
        let Some(stripped) = key.strip_prefix(&prefix) else {
            continue;
        };
        let parsed = serde_json::from_str(&value)
            .unwrap_or_else(|_| serde_json::Value::String(value));
        settings.insert(stripped.to_string(), parsed);
    }
    Ok(settings)
}

/// First key that holds a non-empty string. Later keys are legacy aliases.
pub fn string_setting(
    settings: &HashMap<String, serde_json::Value>,
    keys: &[&str],
) -> Option<String> {
    keys.iter().find_map(|key| {
        settings
            .get(*key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
    })
}

pub fn bool_setting(settings: &HashMap<String, serde_json::Value>, key: &str) -> Option<bool> {
    settings.get(key).and_then(|v| match v {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::String(s) => match s.as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

pub fn u64_setting(settings: &HashMap<String, serde_json::Value>, key: &str) -> Option<u64> {
    settings.get(key).and_then(|v| match v {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    })
}
