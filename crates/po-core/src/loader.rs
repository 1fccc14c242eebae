// Loader (spec §4.2, §6 "PO file format", §6 "Persisted state layout")
//
// Parses `objects/*.md` (YAML frontmatter + markdown body) and validates
// `primitives/*.rhai` source at boot, producing `Capability`s ready for
// `Registry::register`. Grounded on `everruns-core`'s config-loading idiom
// of scanning a directory once at startup; generalized to recognize the
// frontmatter delimiter format and to tolerate a single malformed file
// without aborting the whole load.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::capability::Capability;
use crate::config::{PromptObjectConfig, PromptObjectFile};
use crate::error::{EngineError, EngineResult};
use crate::primitive::PrimitiveCompiler;
use crate::prompt_object::PromptObjectCapability;

pub const OBJECTS_DIR: &str = "objects";
pub const PRIMITIVES_DIR: &str = "primitives";

/// A PO file that failed to parse — loading continues past it (spec §4.2:
/// a malformed definition should not prevent the rest of the environment
/// from booting).
#[derive(Debug, Clone)]
pub struct LoadError {
    pub path: PathBuf,
    pub message: String,
}

#[derive(Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub errors: Vec<LoadError>,
}

/// Split `---\n<yaml>\n---\n<body>` into frontmatter and body (spec §6: "The
/// opening and closing `---` must each be on their own line").
pub fn parse_po_file(content: &str) -> EngineResult<PromptObjectFile> {
    let mut lines = content.lines();
    match lines.next() {
        Some("---") => {}
        _ => return Err(EngineError::config("missing opening `---` frontmatter delimiter")),
    }

    let rest = &content[content.find('\n').map(|i| i + 1).unwrap_or(content.len())..];
    let end = rest
        .find("\n---")
        .ok_or_else(|| EngineError::config("missing closing `---` frontmatter delimiter"))?;
    let yaml = &rest[..end];
    let after_delim = &rest[end + 4..];
    let body = after_delim.strip_prefix('\n').unwrap_or(after_delim);

    let config: PromptObjectConfig = serde_yaml::from_str(yaml)
        .map_err(|e| EngineError::config(format!("invalid frontmatter: {e}")))?;
    if config.name.trim().is_empty() {
        return Err(EngineError::config("frontmatter `name` is required"));
    }

    Ok(PromptObjectFile {
        config,
        body: body.to_string(),
    })
}

/// Serialize a `PromptObjectFile` back to the on-disk `---`-delimited
/// format (spec §4.4 `modify_prompt`/`create_capability` persistence).
pub fn render_po_file(file: &PromptObjectFile) -> EngineResult<String> {
    let yaml = serde_yaml::to_string(&file.config)
        .map_err(|e| EngineError::config(format!("failed to serialize frontmatter: {e}")))?;
    Ok(format!("---\n{yaml}---\n{}", file.body))
}

pub fn po_file_path(root: &Path, name: &str) -> PathBuf {
    root.join(OBJECTS_DIR).join(format!("{name}.md"))
}

pub fn primitive_file_path(root: &Path, name: &str, extension: &str) -> PathBuf {
    root.join(PRIMITIVES_DIR).join(format!("{name}.{extension}"))
}

/// Scan `root/objects/*.md`, parse and register every prompt object.
/// Duplicate names are rejected outright (spec §3: `name` unique); a
/// single malformed file is recorded in the report and skipped.
pub async fn load_prompt_objects(
    root: &Path,
    registry: &crate::registry::Registry,
) -> EngineResult<LoadReport> {
    let mut report = LoadReport::default();
    let dir = root.join(OBJECTS_DIR);
    if !dir.is_dir() {
        return Ok(report);
    }

    let mut entries = tokio::fs::read_dir(&dir)
        .await
        .map_err(|e| EngineError::config(format!("reading {}: {e}", dir.display())))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| EngineError::config(format!("reading {}: {e}", dir.display())))?
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => {
                report.errors.push(LoadError {
                    path: path.clone(),
                    message: e.to_string(),
                });
                continue;
            }
        };

        let file = match parse_po_file(&content) {
            Ok(f) => f,
            Err(e) => {
                report.errors.push(LoadError {
                    path: path.clone(),
                    message: e.user_message(),
                });
                continue;
            }
        };

        if registry.has(&file.config.name) {
            report.errors.push(LoadError {
                path,
                message: format!("duplicate prompt object name: {}", file.config.name),
            });
            continue;
        }

        let name = file.config.name.clone();
        let capability: Arc<dyn Capability> =
            Arc::new(PromptObjectCapability::new(file.config, file.body));
        if let Err(e) = registry.register(capability) {
            report.errors.push(LoadError {
                path,
                message: e.user_message(),
            });
            continue;
        }
        report.loaded.push(name);
    }

    Ok(report)
}

/// Validate every `primitives/*.rhai` source file at boot without
/// registering anything — native stdlib primitives are registered directly
/// by `po-engine`, so this only covers runtime-authored script primitives
/// persisted from a previous `create_primitive` call (spec §4.2, §6).
pub async fn verify_primitive_sources(
    root: &Path,
    compiler: &dyn PrimitiveCompiler,
) -> EngineResult<LoadReport> {
    let mut report = LoadReport::default();
    let dir = root.join(PRIMITIVES_DIR);
    if !dir.is_dir() {
        return Ok(report);
    }

    let mut entries = tokio::fs::read_dir(&dir)
        .await
        .map_err(|e| EngineError::config(format!("reading {}: {e}", dir.display())))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| EngineError::config(format!("reading {}: {e}", dir.display())))?
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("rhai") {
            continue;
        }
        let source = match tokio::fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) => {
                report.errors.push(LoadError {
                    path: path.clone(),
                    message: e.to_string(),
                });
                continue;
            }
        };
        match compiler.verify(&source).await {
            Ok(()) => report
                .loaded
                .push(path.file_stem().and_then(|s| s.to_str()).unwrap_or_default().to_string()),
            Err(e) => report.errors.push(LoadError {
                path,
                message: e.user_message(),
            }),
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_frontmatter_and_body() {
        let content = "---\nname: greeter\ndescription: says hi\ncapabilities: []\n---\nYou are friendly.\n";
        let file = parse_po_file(content).unwrap();
        assert_eq!(file.config.name, "greeter");
        assert_eq!(file.body, "You are friendly.\n");
    }

    #[test]
    fn missing_name_is_rejected() {
        let content = "---\ndescription: nameless\n---\nbody\n";
        let err = parse_po_file(content).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn missing_delimiter_is_rejected() {
        let err = parse_po_file("no frontmatter here").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn round_trips_through_render() {
        let original = "---\nname: greeter\ndescription: says hi\ncapabilities: []\n---\nYou are friendly.\n";
        let parsed = parse_po_file(original).unwrap();
        let rendered = render_po_file(&parsed).unwrap();
        let reparsed = parse_po_file(&rendered).unwrap();
        assert_eq!(reparsed.config.name, "greeter");
        assert_eq!(reparsed.body, parsed.body);
    }
}
