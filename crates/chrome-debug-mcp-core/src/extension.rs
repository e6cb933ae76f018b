//! Extension metadata, execution-context kinds and cache entries.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Execution environment of an extension that can be made the debugging target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionContextType {
    /// Background page or service worker
    Background,
    /// Content script injected into a web page (isolated world)
    ContentScript,
    /// Open browser-action / action popup
    Popup,
}

impl ExtensionContextType {
    /// Wire name of the context type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtensionContextType::Background => "background",
            ExtensionContextType::ContentScript => "content_script",
            ExtensionContextType::Popup => "popup",
        }
    }
}

impl std::fmt::Display for ExtensionContextType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExtensionContextType {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "background" => Ok(ExtensionContextType::Background),
            "content_script" | "content-script" | "contentScript" => {
                Ok(ExtensionContextType::ContentScript)
            }
            "popup" => Ok(ExtensionContextType::Popup),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown extension context type '{other}' (expected background, content_script or popup)"
            ))),
        }
    }
}

/// A live execution context belonging to an extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionTarget {
    /// Kind of context
    pub context_type: ExtensionContextType,
    /// Target hosting the context
    pub target_id: String,
    /// URL of the hosting target
    pub url: String,
    /// Isolated-world execution context id (content scripts only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_context_id: Option<i64>,
}

/// Metadata about one installed extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionInfo {
    /// Extension identifier (32 chars a-p)
    pub id: String,
    /// Display name
    pub name: String,
    /// Version from the manifest, when it could be read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Manifest version (2 or 3)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_version: Option<u32>,
    /// Description from the manifest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the extension had live targets at last enumeration
    pub enabled: bool,
    /// Live contexts seen at last enumeration
    #[serde(default)]
    pub contexts: Vec<ExtensionTarget>,
}

impl ExtensionInfo {
    /// Create metadata with only an id and a name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: None,
            manifest_version: None,
            description: None,
            enabled: true,
            contexts: Vec::new(),
        }
    }

    /// Whether a context of the given type was seen.
    pub fn has_context(&self, context_type: ExtensionContextType) -> bool {
        self.contexts
            .iter()
            .any(|ctx| ctx.context_type == context_type)
    }
}

/// Cached extension metadata tagged with its update time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionCacheEntry {
    /// Cached payload
    #[serde(flatten)]
    pub data: ExtensionInfo,
    /// When the entry was last written
    pub last_updated: DateTime<Utc>,
}

impl ExtensionCacheEntry {
    /// Wrap data with the current time.
    pub fn new(data: ExtensionInfo) -> Self {
        Self {
            data,
            last_updated: Utc::now(),
        }
    }

    /// Whether the entry is younger than `ttl_ms` at `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl_ms: u64) -> bool {
        let age = now.signed_duration_since(self.last_updated);
        age.num_milliseconds() >= 0 && (age.num_milliseconds() as u64) < ttl_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_context_type_parse() {
        assert_eq!(
            "background".parse::<ExtensionContextType>().unwrap(),
            ExtensionContextType::Background
        );
        assert_eq!(
            "content_script".parse::<ExtensionContextType>().unwrap(),
            ExtensionContextType::ContentScript
        );
        assert!("sidebar".parse::<ExtensionContextType>().is_err());
    }

    #[test]
    fn test_context_type_serialization() {
        let json = serde_json::to_string(&ExtensionContextType::ContentScript).unwrap();
        assert_eq!(json, "\"content_script\"");
        let parsed: ExtensionContextType = serde_json::from_str("\"popup\"").unwrap();
        assert_eq!(parsed, ExtensionContextType::Popup);
    }

    #[test]
    fn test_cache_entry_flattens_data() {
        let mut info = ExtensionInfo::new("abc", "Demo");
        info.version = Some("1.2.0".to_string());
        let entry = ExtensionCacheEntry::new(info);
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["id"], "abc");
        assert_eq!(value["name"], "Demo");
        assert_eq!(value["version"], "1.2.0");
        assert!(value.get("lastUpdated").is_some());
    }

    #[test]
    fn test_cache_entry_freshness() {
        let entry = ExtensionCacheEntry::new(ExtensionInfo::new("abc", "Demo"));
        let now = entry.last_updated;
        assert!(entry.is_fresh(now, 1000));
        assert!(entry.is_fresh(now + Duration::milliseconds(999), 1000));
        assert!(!entry.is_fresh(now + Duration::milliseconds(1000), 1000));
    }

    #[test]
    fn test_has_context() {
        let mut info = ExtensionInfo::new("abc", "Demo");
        info.contexts.push(ExtensionTarget {
            context_type: ExtensionContextType::Background,
            target_id: "T1".to_string(),
            url: "chrome-extension://abc/bg.js".to_string(),
            execution_context_id: None,
        });
        assert!(info.has_context(ExtensionContextType::Background));
        assert!(!info.has_context(ExtensionContextType::Popup));
    }
}
