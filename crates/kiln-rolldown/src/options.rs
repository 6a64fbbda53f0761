//! Translation from a kiln [`BundleConfig`] to Rolldown options.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use kiln_build::externals::package_name;
use kiln_build::{BundleConfig, EntrySource, ExternalPolicy, Platform, SourceMapMode, third_party_dependencies};
use rolldown::{BundlerOptions, InputItem, IsExternal, OutputFormat, RawMinifyOptions, SourceMapType};

use crate::error::{Error, Result};

/// Directory under the output directory holding materialised virtual entries.
pub const VIRTUAL_DIR: &str = ".virtual";

/// Write virtual entry sources to disk and return one Rolldown input per
/// entry point, named after it.
pub(crate) fn materialize_inputs(config: &BundleConfig) -> Result<Vec<InputItem>> {
    let mut inputs = Vec::with_capacity(config.entry_points.len());
    for (name, source) in config.entry_points.iter() {
        let import = match source {
            EntrySource::File { path } => path.clone(),
            EntrySource::Virtual { id, contents } => {
                let path = virtual_entry_path(&config.out_dir, id)?;
                write_if_changed(&path, contents)?;
                path
            }
        };
        inputs.push(InputItem {
            name: Some(name.to_string()),
            import: import.to_string_lossy().into_owned(),
        });
    }
    Ok(inputs)
}

/// `<out_dir>/.virtual/<id>.js`, with the id reduced to a safe file name.
pub fn virtual_entry_path(out_dir: &Path, id: &str) -> Result<PathBuf> {
    let file: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if file.trim_matches('_').is_empty() {
        return Err(Error::VirtualEntry(format!("virtual entry id '{}' has no usable characters", id)));
    }
    Ok(out_dir.join(VIRTUAL_DIR).join(format!("{}.js", file)))
}

// Rewriting an unchanged shim would bump its mtime and retrigger watchers.
fn write_if_changed(path: &Path, contents: &str) -> Result<()> {
    if std::fs::read_to_string(path).is_ok_and(|existing| existing == contents) {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            Error::VirtualEntry(format!("failed to create '{}': {}", parent.display(), e))
        })?;
    }
    std::fs::write(path, contents)
        .map_err(|e| Error::VirtualEntry(format!("failed to write '{}': {}", path.display(), e)))
}

type ExternalVerdict = Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + 'static>>;

type ExternalFn = dyn Fn(&str, Option<&str>, bool) -> ExternalVerdict + Send + Sync;

/// Rolldown's external check for `config`, answered by its
/// [`ExternalPolicy`].
///
/// Resolved ids are absolute paths, which the policy never externalises.
/// Bare imports of packages `package.json` does not declare are still
/// external; they are only logged.
pub fn external_predicate(config: &BundleConfig) -> IsExternal {
    if config.external == ExternalPolicy::BundleAll {
        return IsExternal::default();
    }

    let policy = config.external.clone();
    let declared = third_party_dependencies(&config.root);
    let target = config.target.clone();
    let predicate: Arc<ExternalFn> = Arc::new(
        move |specifier: &str, _importer: Option<&str>, _resolved: bool| -> ExternalVerdict {
            let external = policy.is_external(specifier);
            if external {
                if let Some(name) = package_name(specifier) {
                    if !declared.contains(name) {
                        tracing::debug!(target_name = %target, "Externalizing undeclared package '{}'", name);
                    }
                }
            }
            Box::pin(async move { Ok(external) })
        },
    );
    IsExternal::Fn(Some(predicate))
}

pub(crate) fn bundler_options(config: &BundleConfig, input: Vec<InputItem>) -> BundlerOptions {
    let sourcemap = match config.sourcemap {
        SourceMapMode::External => Some(SourceMapType::File),
        SourceMapMode::Inline => Some(SourceMapType::Inline),
        SourceMapMode::Hidden => Some(SourceMapType::Hidden),
        SourceMapMode::None => None,
    };
    let platform = match config.platform {
        Platform::Browser => rolldown::Platform::Browser,
        Platform::Server => rolldown::Platform::Node,
    };
    if !config.tree_shake {
        tracing::debug!(target_name = %config.target, "Tree shaking cannot be disabled for Rolldown builds");
    }

    BundlerOptions {
        input: Some(input),
        cwd: Some(config.root.clone()),
        format: Some(OutputFormat::Esm),
        platform: Some(platform),
        sourcemap,
        minify: Some(RawMinifyOptions::from(config.minify)),
        external: Some(external_predicate(config)),
        ..Default::default()
    }
}
