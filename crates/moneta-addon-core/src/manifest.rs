//! Addon package metadata.
//!
//! The external package storage unpacks an installed addon into an
//! [`AddonBundle`]: the parsed `manifest.json` plus the file tree, with one
//! file flagged as the main module. The host consumes bundles read-only and
//! never mutates a manifest.
//!
//! Wire form is camelCase:
//!
//! ```json
//! {
//!   "id": "tracker",
//!   "name": "Spending Tracker",
//!   "version": "0.4.1",
//!   "main": "addon.js",
//!   "sdkVersion": "1.0.0",
//!   "enabled": true,
//!   "permissions": [
//!     { "category": "accounts", "functions": [{ "name": "getAll", "isDetected": true }] }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};

/// Declarative metadata describing an installed addon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddonManifest {
    /// Stable identifier; the key for every per-addon table in the host.
    pub id: String,
    /// Human-readable display name.
    pub name: String,
    /// Addon's own version string.
    pub version: String,
    /// Relative path of the entry file inside the package.
    pub main: String,
    /// SDK version the addon was built against, when declared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdk_version: Option<String>,
    /// Whether the addon participates in loading. Defaults to `true`.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Permissions the addon declares, grouped by API category.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<PermissionGrant>,
}

fn default_enabled() -> bool {
    true
}

/// One declared permission category with the functions the addon touches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionGrant {
    /// API group name (e.g. `accounts`, `portfolio`).
    pub category: String,
    /// Functions within the category.
    #[serde(default)]
    pub functions: Vec<DeclaredFunction>,
}

/// A single function reference inside a permission grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclaredFunction {
    /// Function name within the group.
    pub name: String,
    /// Whether the declaration was detected by static analysis rather than
    /// written by the author.
    #[serde(default)]
    pub is_detected: bool,
}

/// One file of an unpacked addon package.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddonFile {
    /// Path-like name inside the package.
    pub name: String,
    /// Source text.
    pub content: String,
    /// Whether this file is the main module.
    #[serde(default)]
    pub is_main: bool,
}

/// An unpacked addon: manifest plus file tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddonBundle {
    /// Parsed `manifest.json`.
    pub manifest: AddonManifest,
    /// Extracted files; at most one is flagged as main.
    #[serde(default)]
    pub files: Vec<AddonFile>,
}

impl AddonBundle {
    /// Returns the file flagged as the main module, if any.
    pub fn main_file(&self) -> Option<&AddonFile> {
        self.files.iter().find(|f| f.is_main)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_defaults() {
        let manifest: AddonManifest = serde_json::from_str(
            r#"{ "id": "tracker", "name": "Tracker", "version": "1.0.0", "main": "addon.js" }"#,
        )
        .unwrap();
        assert!(manifest.enabled);
        assert!(manifest.sdk_version.is_none());
        assert!(manifest.permissions.is_empty());
    }

    #[test]
    fn test_manifest_camel_case_fields() {
        let manifest: AddonManifest = serde_json::from_str(
            r#"{
                "id": "tracker",
                "name": "Tracker",
                "version": "1.0.0",
                "main": "addon.js",
                "sdkVersion": "1.2.0",
                "enabled": false,
                "permissions": [
                    { "category": "accounts", "functions": [{ "name": "getAll", "isDetected": true }] }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(manifest.sdk_version.as_deref(), Some("1.2.0"));
        assert!(!manifest.enabled);
        assert!(manifest.permissions[0].functions[0].is_detected);
    }

    #[test]
    fn test_bundle_main_file() {
        let bundle: AddonBundle = serde_json::from_str(
            r#"{
                "manifest": { "id": "a", "name": "A", "version": "0.1.0", "main": "main.js" },
                "files": [
                    { "name": "lib.js", "content": "" },
                    { "name": "main.js", "content": "fn enable(ctx) {}", "isMain": true }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(bundle.main_file().unwrap().name, "main.js");
    }

    #[test]
    fn test_bundle_without_main_file() {
        let bundle = AddonBundle {
            manifest: serde_json::from_str(
                r#"{ "id": "a", "name": "A", "version": "0.1.0", "main": "main.js" }"#,
            )
            .unwrap(),
            files: vec![],
        };
        assert!(bundle.main_file().is_none());
    }
}
