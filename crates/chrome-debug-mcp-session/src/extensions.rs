//! Extension-context resolution and extension enumeration.
//!
//! An extension exposes up to three kinds of execution context:
//!
//! - `background`: its service worker (MV3) or background page (MV2)
//! - `popup`: an open `chrome-extension://<id>/...popup...` page
//! - `content_script`: an isolated world injected into a regular page,
//!   reported through `Runtime.executionContextCreated` on that page's session
//!
//! Background and popup contexts are whole targets; content scripts are
//! execution contexts inside page targets and are addressed by context id.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use chrome_debug_mcp_cdp::BrowserConnection;
use chrome_debug_mcp_core::{
    Error, ExtensionContextType, ExtensionInfo, ExtensionTarget, Result, TargetInfo, TargetKind,
};

const MANIFEST_EXPRESSION: &str = "chrome.runtime.getManifest()";
const CONTEXT_DISCOVERY_ATTEMPTS: u32 = 10;
const CONTEXT_DISCOVERY_DELAY: Duration = Duration::from_millis(50);

/// The extension context currently targeted by extension-scoped operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionContext {
    /// Extension id
    pub extension_id: String,
    /// Flat session commands are sent to
    pub session_id: String,
    /// Resolved target (and context id for content scripts)
    pub target: ExtensionTarget,
}

impl ExtensionContext {
    /// Kind of the context.
    pub fn context_type(&self) -> ExtensionContextType {
        self.target.context_type
    }
}

/// Resolves extension contexts against one live connection.
pub struct ExtensionContextTracker {
    connection: Arc<BrowserConnection>,
}

impl ExtensionContextTracker {
    /// Tracker for `connection`.
    pub fn new(connection: Arc<BrowserConnection>) -> Self {
        Self { connection }
    }

    /// Find the live context `(extension_id, context_type)` and attach to it.
    ///
    /// For content scripts, `preferred_page` (a target id) is tried first.
    /// Fails with `TargetNotFound` when the extension has no such context.
    pub async fn resolve(
        &self,
        extension_id: &str,
        context_type: ExtensionContextType,
        preferred_page: Option<&str>,
    ) -> Result<ExtensionContext> {
        let targets = self.connection.list_targets().await?;

        if context_type == ExtensionContextType::ContentScript {
            return self
                .resolve_content_script(extension_id, &targets, preferred_page)
                .await;
        }

        let target = targets
            .iter()
            .find(|t| {
                t.extension_id() == Some(extension_id) && classify(t) == Some(context_type)
            })
            .ok_or_else(|| not_found(extension_id, context_type))?;

        let session_id = self.connection.attach_session(target).await?;
        debug!(extension = %extension_id, %context_type, target = %target.target_id, "Resolved extension context");

        Ok(ExtensionContext {
            extension_id: extension_id.to_string(),
            session_id,
            target: ExtensionTarget {
                context_type,
                target_id: target.target_id.clone(),
                url: target.url.clone(),
                execution_context_id: None,
            },
        })
    }

    async fn resolve_content_script(
        &self,
        extension_id: &str,
        targets: &[TargetInfo],
        preferred_page: Option<&str>,
    ) -> Result<ExtensionContext> {
        let attached_new = self.attach_regular_pages(targets).await;

        // Contexts of freshly attached sessions arrive as events.
        let attempts = if attached_new {
            CONTEXT_DISCOVERY_ATTEMPTS
        } else {
            1
        };
        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(CONTEXT_DISCOVERY_DELAY).await;
            }

            let mut candidates: Vec<_> = self
                .connection
                .sessions()
                .content_script_contexts()
                .into_iter()
                .filter(|(_, ctx)| ctx.extension_id() == Some(extension_id))
                .collect();
            candidates.sort_by_key(|(session, ctx)| {
                (Some(session.target.target_id.as_str()) != preferred_page, ctx.id)
            });

            if let Some((session, context)) = candidates.into_iter().next() {
                return Ok(ExtensionContext {
                    extension_id: extension_id.to_string(),
                    session_id: session.session_id,
                    target: ExtensionTarget {
                        context_type: ExtensionContextType::ContentScript,
                        target_id: session.target.target_id,
                        url: session.target.url,
                        execution_context_id: Some(context.id),
                    },
                });
            }
        }

        Err(not_found(extension_id, ExtensionContextType::ContentScript))
    }

    /// Attach to every regular page so its contexts get reported. Returns
    /// whether any new session was opened.
    async fn attach_regular_pages(&self, targets: &[TargetInfo]) -> bool {
        let mut attached_new = false;
        for target in targets
            .iter()
            .filter(|t| t.is_page() && t.extension_id().is_none())
        {
            if self
                .connection
                .sessions()
                .session_for_target(&target.target_id)
                .is_some()
            {
                continue;
            }
            match self.connection.attach_session(target).await {
                Ok(_) => attached_new = true,
                Err(e) => debug!(target = %target.target_id, "Could not attach to page: {}", e),
            }
        }
        attached_new
    }

    /// Enumerate extensions visible through live targets and content scripts.
    ///
    /// Names and versions come from the manifest when a background context can
    /// be evaluated; otherwise the id doubles as name.
    pub async fn enumerate(&self) -> Result<Vec<ExtensionInfo>> {
        let targets = self.connection.list_targets().await?;
        let mut found: BTreeMap<String, ExtensionInfo> = BTreeMap::new();
        let mut backgrounds: BTreeMap<String, TargetInfo> = BTreeMap::new();

        for target in &targets {
            let Some(id) = target.extension_id() else {
                continue;
            };
            let info = found
                .entry(id.to_string())
                .or_insert_with(|| ExtensionInfo::new(id, id));
            let Some(context_type) = classify(target) else {
                continue;
            };
            if context_type == ExtensionContextType::Background {
                backgrounds
                    .entry(id.to_string())
                    .or_insert_with(|| target.clone());
            }
            info.contexts.push(ExtensionTarget {
                context_type,
                target_id: target.target_id.clone(),
                url: target.url.clone(),
                execution_context_id: None,
            });
        }

        for (session, context) in self.connection.sessions().content_script_contexts() {
            let Some(id) = context.extension_id() else {
                continue;
            };
            let info = found
                .entry(id.to_string())
                .or_insert_with(|| ExtensionInfo::new(id, id));
            if info.name == info.id && !context.name.is_empty() {
                info.name = context.name.clone();
            }
            info.contexts.push(ExtensionTarget {
                context_type: ExtensionContextType::ContentScript,
                target_id: session.target.target_id.clone(),
                url: session.target.url.clone(),
                execution_context_id: Some(context.id),
            });
        }

        for (id, target) in &backgrounds {
            if let Some(info) = found.get_mut(id) {
                self.apply_manifest(info, target).await;
            }
        }

        Ok(found.into_values().collect())
    }

    async fn apply_manifest(&self, info: &mut ExtensionInfo, background: &TargetInfo) {
        let session = match self.connection.attach_session(background).await {
            Ok(session) => session,
            Err(e) => {
                debug!(extension = %info.id, "Cannot attach to background: {}", e);
                return;
            }
        };
        match self
            .connection
            .evaluate(&session, MANIFEST_EXPRESSION, None)
            .await
        {
            Ok(manifest) => apply_manifest_fields(info, &manifest),
            Err(e) => debug!(extension = %info.id, "Manifest lookup failed: {}", e),
        }
    }
}

/// Context kind of an extension-owned target.
fn classify(target: &TargetInfo) -> Option<ExtensionContextType> {
    target.extension_id()?;
    match target.kind() {
        TargetKind::ServiceWorker | TargetKind::BackgroundPage => {
            Some(ExtensionContextType::Background)
        }
        TargetKind::Page if target.url.to_lowercase().contains("popup") => {
            Some(ExtensionContextType::Popup)
        }
        _ => None,
    }
}

fn apply_manifest_fields(info: &mut ExtensionInfo, manifest: &Value) {
    if let Some(name) = manifest.get("name").and_then(Value::as_str) {
        info.name = name.to_string();
    }
    info.version = manifest
        .get("version")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or(info.version.take());
    info.manifest_version = manifest
        .get("manifest_version")
        .and_then(Value::as_u64)
        .map(|v| v as u32)
        .or(info.manifest_version);
    info.description = manifest
        .get("description")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or(info.description.take());
}

fn not_found(extension_id: &str, context_type: ExtensionContextType) -> Error {
    Error::TargetNotFound(format!(
        "no live {context_type} context for extension {extension_id}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrome_debug_mcp_cdp::testing::MockBrowser;
    use serde_json::json;

    const EXT: &str = "abcdefghijklmnopabcdefghijklmnop";

    #[test]
    fn test_classify() {
        let sw = MockBrowser::target(
            "W1",
            "service_worker",
            &format!("chrome-extension://{EXT}/bg.js"),
        );
        assert_eq!(classify(&sw), Some(ExtensionContextType::Background));

        let popup = MockBrowser::target(
            "P1",
            "page",
            &format!("chrome-extension://{EXT}/popup.html"),
        );
        assert_eq!(classify(&popup), Some(ExtensionContextType::Popup));

        let options = MockBrowser::target(
            "P2",
            "page",
            &format!("chrome-extension://{EXT}/options.html"),
        );
        assert_eq!(classify(&options), None);

        let web = MockBrowser::target("P3", "page", "https://example.com/popup");
        assert_eq!(classify(&web), None);
    }

    #[test]
    fn test_apply_manifest_fields() {
        let mut info = ExtensionInfo::new(EXT, EXT);
        apply_manifest_fields(
            &mut info,
            &json!({"name": "Demo", "version": "1.0.1", "manifest_version": 3}),
        );
        assert_eq!(info.name, "Demo");
        assert_eq!(info.version.as_deref(), Some("1.0.1"));
        assert_eq!(info.manifest_version, Some(3));
        assert!(info.description.is_none());
    }
}
