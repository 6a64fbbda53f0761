//! Which import specifiers stay unresolved in the bundle.
//!
//! Browser targets bundle everything. Server-side targets leave third-party
//! packages to the runtime's own module resolution, but still bundle packages
//! that belong to the project's workspace (they are source code, not
//! installed dependencies).

use std::collections::BTreeSet;
use std::path::Path;

use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ExternalPolicy {
    /// Nothing is external.
    #[default]
    BundleAll,
    /// Bare package specifiers are external unless the package is a
    /// workspace member.
    ThirdParty { workspace: BTreeSet<String> },
}

impl ExternalPolicy {
    /// Third-party policy for the project at `root`, bundling any detected
    /// workspace members.
    pub fn third_party(root: &Path) -> Self {
        ExternalPolicy::ThirdParty {
            workspace: detect_workspace(root).unwrap_or_default(),
        }
    }

    pub fn is_external(&self, specifier: &str) -> bool {
        let ExternalPolicy::ThirdParty { workspace } = self else {
            return false;
        };

        if specifier.starts_with("node:") {
            return true;
        }
        match package_name(specifier) {
            Some(name) => !workspace.contains(name),
            None => false,
        }
    }
}

/// Package name of a bare specifier: `@scope/name` or `name`. `None` for
/// relative, absolute, virtual and package-internal (`#`) specifiers.
pub fn package_name(specifier: &str) -> Option<&str> {
    if specifier.is_empty()
        || specifier.starts_with('.')
        || specifier.starts_with('/')
        || specifier.starts_with('\\')
        || specifier.starts_with('\0')
        || specifier.starts_with('#')
        || specifier.contains(':')
    {
        return None;
    }

    if specifier.starts_with('@') {
        let mut parts = specifier.splitn(3, '/');
        let scope = parts.next()?;
        let name = parts.next().filter(|n| !n.is_empty())?;
        let end = scope.len() + 1 + name.len();
        return Some(&specifier[..end]);
    }

    specifier.split('/').next().filter(|n| !n.is_empty())
}

fn read_package_json(dir: &Path) -> Option<Value> {
    let contents = std::fs::read_to_string(dir.join("package.json")).ok()?;
    match serde_json::from_str(&contents) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Ignoring unreadable {}/package.json: {}", dir.display(), e);
            None
        }
    }
}

fn workspace_patterns(package: &Value) -> Option<Vec<String>> {
    let workspaces = package.get("workspaces")?;
    let list = match workspaces {
        Value::Array(list) => list,
        Value::Object(map) => map.get("packages")?.as_array()?,
        _ => return None,
    };
    Some(
        list.iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
    )
}

/// Names of the workspace member packages of the project at `root`, or
/// `None` when the project declares no workspace.
///
/// Supports `workspaces` as an array or as `{ "packages": [...] }`, with
/// literal directories and single-level `dir/*` patterns. Dependencies
/// declared with the `workspace:` protocol count as members too.
pub fn detect_workspace(root: &Path) -> Option<BTreeSet<String>> {
    let package = read_package_json(root)?;
    let patterns = workspace_patterns(&package);

    let mut members: BTreeSet<String> = declared_dependencies(&package)
        .filter(|(_, version)| version.starts_with("workspace:"))
        .map(|(name, _)| name.to_string())
        .collect();

    if patterns.is_none() && members.is_empty() {
        return None;
    }

    for pattern in patterns.unwrap_or_default() {
        let pattern = pattern.trim_start_matches("./");
        if pattern.starts_with('!') {
            continue;
        }

        let dirs = match pattern.strip_suffix("/*").or_else(|| pattern.strip_suffix("/**")) {
            Some(parent) => match std::fs::read_dir(root.join(parent)) {
                Ok(read) => read
                    .filter_map(|entry| entry.ok())
                    .map(|entry| entry.path())
                    .filter(|path| path.is_dir())
                    .collect(),
                Err(_) => Vec::new(),
            },
            None => vec![root.join(pattern)],
        };

        for dir in dirs {
            if let Some(name) = read_package_json(&dir)
                .and_then(|pkg| pkg.get("name").and_then(Value::as_str).map(str::to_string))
            {
                members.insert(name);
            }
        }
    }

    Some(members)
}

fn declared_dependencies(package: &Value) -> impl Iterator<Item = (&str, &str)> {
    ["dependencies", "peerDependencies", "optionalDependencies"]
        .into_iter()
        .filter_map(|field| package.get(field).and_then(Value::as_object))
        .flat_map(|deps| {
            deps.iter()
                .map(|(name, version)| (name.as_str(), version.as_str().unwrap_or("")))
        })
}

/// Installed (non-workspace) dependency names declared by the project at
/// `root`.
pub fn third_party_dependencies(root: &Path) -> BTreeSet<String> {
    let Some(package) = read_package_json(root) else {
        return BTreeSet::new();
    };
    declared_dependencies(&package)
        .filter(|(_, version)| !version.starts_with("workspace:"))
        .map(|(name, _)| name.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_package(dir: &Path, json: serde_json::Value) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join("package.json"), json.to_string()).unwrap();
    }

    #[test]
    fn test_package_name() {
        assert_eq!(package_name("react"), Some("react"));
        assert_eq!(package_name("react-dom/client"), Some("react-dom"));
        assert_eq!(package_name("@tanstack/router/dist/x"), Some("@tanstack/router"));
        assert_eq!(package_name("@scope"), None);
        assert_eq!(package_name("./local"), None);
        assert_eq!(package_name("/abs/path.js"), None);
        assert_eq!(package_name("\0virtual"), None);
        assert_eq!(package_name("node:fs"), None);
        assert_eq!(package_name("#internal"), None);
    }

    #[test]
    fn test_bundle_all_externalizes_nothing() {
        let policy = ExternalPolicy::BundleAll;
        assert!(!policy.is_external("react"));
        assert!(!policy.is_external("node:fs"));
    }

    #[test]
    fn test_third_party_policy() {
        let policy = ExternalPolicy::ThirdParty {
            workspace: BTreeSet::from(["@acme/ui".to_string()]),
        };
        assert!(policy.is_external("react"));
        assert!(policy.is_external("node:path"));
        assert!(!policy.is_external("@acme/ui/button"));
        assert!(!policy.is_external("./routes"));
        assert!(!policy.is_external("/srv/app/src/api.ts"));
    }

    #[test]
    fn test_detect_workspace_array_and_glob() {
        let dir = TempDir::new().unwrap();
        write_package(
            dir.path(),
            serde_json::json!({ "name": "root", "workspaces": ["packages/*", "tools/cli"] }),
        );
        write_package(&dir.path().join("packages/ui"), serde_json::json!({ "name": "@acme/ui" }));
        write_package(&dir.path().join("packages/db"), serde_json::json!({ "name": "@acme/db" }));
        write_package(&dir.path().join("tools/cli"), serde_json::json!({ "name": "acme-cli" }));

        let members = detect_workspace(dir.path()).unwrap();
        assert_eq!(
            members,
            BTreeSet::from([
                "@acme/db".to_string(),
                "@acme/ui".to_string(),
                "acme-cli".to_string()
            ])
        );
    }

    #[test]
    fn test_detect_workspace_object_form() {
        let dir = TempDir::new().unwrap();
        write_package(
            dir.path(),
            serde_json::json!({ "workspaces": { "packages": ["libs/*"] } }),
        );
        write_package(&dir.path().join("libs/core"), serde_json::json!({ "name": "core" }));

        assert_eq!(
            detect_workspace(dir.path()),
            Some(BTreeSet::from(["core".to_string()]))
        );
    }

    #[test]
    fn test_no_workspace_context() {
        let dir = TempDir::new().unwrap();
        assert_eq!(detect_workspace(dir.path()), None);

        write_package(dir.path(), serde_json::json!({ "dependencies": { "react": "^19.0.0" } }));
        assert_eq!(detect_workspace(dir.path()), None);
    }

    #[test]
    fn test_third_party_dependencies_skip_workspace_protocol() {
        let dir = TempDir::new().unwrap();
        write_package(
            dir.path(),
            serde_json::json!({
                "dependencies": { "react": "^19.0.0", "@acme/ui": "workspace:*" },
                "peerDependencies": { "react-dom": "^19.0.0" },
                "devDependencies": { "typescript": "^5.0.0" }
            }),
        );

        assert_eq!(
            third_party_dependencies(dir.path()),
            BTreeSet::from(["react".to_string(), "react-dom".to_string()])
        );
        assert_eq!(
            detect_workspace(dir.path()),
            Some(BTreeSet::from(["@acme/ui".to_string()]))
        );
    }
}
