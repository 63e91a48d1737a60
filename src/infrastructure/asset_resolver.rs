use crate::core::models::{ContentType, ModuleId, ModuleNode};
use crate::utils::{normalize, Logger, ResolutionError, Result};
use std::path::{Path, PathBuf};

/// Extensions tried, in order, for an extensionless script or style reference
const IMPLICIT_EXTENSIONS: &[&str] = &["js", "mjs", "css", "scss", "sass"];
const STYLE_EXTENSIONS: &[&str] = &["scss", "sass", "css"];

/// Maps reference strings to files on disk. Stateless: every call reads the
/// file system as it is at that moment.
#[derive(Debug, Clone)]
pub struct AssetResolver {
    root: PathBuf,
}

impl AssetResolver {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Resolve a script, stylesheet or asset reference. `from` is `None`
    /// for entries, whose reference is already a path.
    pub fn resolve(&self, reference: &str, from: Option<&Path>) -> Result<ModuleNode> {
        let from_label = self.label(from);
        if let Some(from) = from {
            Logger::resolving(reference, from);
        }

        let cleaned = strip_query(reference);
        let path = match from {
            None => self.lookup(Path::new(cleaned)),
            Some(from) if is_relative(cleaned) => {
                let base = from.parent().unwrap_or(&self.root);
                self.lookup(&normalize(&base.join(cleaned)))
            }
            Some(_) if cleaned.starts_with('/') => {
                self.lookup(&normalize(&self.root.join(cleaned.trim_start_matches('/'))))
            }
            Some(from) => self.lookup_package(cleaned, from),
        };

        match path {
            Lookup::Found(path) => Ok(self.node_for(path)),
            Lookup::Ambiguous(candidates) => Err(ResolutionError::Ambiguous {
                reference: reference.to_string(),
                from: from_label,
                candidates,
            }
            .into()),
            Lookup::Missing => Err(ResolutionError::NotFound {
                reference: reference.to_string(),
                from: from_label,
            }
            .into()),
        }
    }

    /// Resolve a stylesheet `@use`/`@import`/`@forward` target with Sass
    /// partial rules (`_name.scss`, `name/_index.scss`)
    pub fn resolve_style_import(&self, reference: &str, from: &Path) -> Result<ModuleNode> {
        Logger::resolving(reference, from);

        let base = from.parent().unwrap_or(&self.root);
        let target = normalize(&base.join(strip_query(reference)));

        let mut candidates = Vec::new();
        if target.extension().is_some() {
            candidates.push(target.clone());
            candidates.push(partial_of(&target));
        } else {
            for ext in STYLE_EXTENSIONS {
                let with_ext = append_extension(&target, ext);
                candidates.push(partial_of(&with_ext));
                candidates.push(with_ext);
            }
            for ext in STYLE_EXTENSIONS {
                candidates.push(target.join(format!("_index.{}", ext)));
                candidates.push(target.join(format!("index.{}", ext)));
            }
        }

        let found: Vec<PathBuf> = candidates.into_iter().filter(|p| p.is_file()).collect();
        match found.len() {
            0 => Err(ResolutionError::NotFound {
                reference: reference.to_string(),
                from: self.label(Some(from)),
            }
            .into()),
            1 => Ok(self.node_for(found[0].clone())),
            _ => Err(ResolutionError::Ambiguous {
                reference: reference.to_string(),
                from: self.label(Some(from)),
                candidates: found,
            }
            .into()),
        }
    }

    fn node_for(&self, path: PathBuf) -> ModuleNode {
        let id = ModuleId::from_path(&self.root, &path);
        let content_type = ContentType::from_path(&path);
        ModuleNode::new(id, path, content_type)
    }

    fn label(&self, from: Option<&Path>) -> String {
        match from {
            Some(path) => ModuleId::from_path(&self.root, path).to_string(),
            None => "<entries>".to_string(),
        }
    }

    fn lookup(&self, path: &Path) -> Lookup {
        if path.is_file() {
            return Lookup::Found(path.to_path_buf());
        }

        let with_extension = existing(IMPLICIT_EXTENSIONS.iter().map(|ext| append_extension(path, ext)));
        match with_extension.len() {
            1 => return Lookup::Found(with_extension[0].clone()),
            n if n > 1 => return Lookup::Ambiguous(with_extension),
            _ => {}
        }

        if path.is_dir() {
            let index = existing(["index.js", "index.mjs"].iter().map(|name| path.join(name)));
            match index.len() {
                1 => return Lookup::Found(index[0].clone()),
                n if n > 1 => return Lookup::Ambiguous(index),
                _ => {}
            }
        }

        Lookup::Missing
    }

    /// Bare specifier: walk up from the importer looking for node_modules
    fn lookup_package(&self, specifier: &str, from: &Path) -> Lookup {
        let (package, subpath) = split_package_specifier(specifier);
        let mut current = from.parent();

        while let Some(dir) = current {
            let package_dir = dir.join("node_modules").join(&package);
            if package_dir.is_dir() {
                return match &subpath {
                    Some(subpath) => self.lookup(&package_dir.join(subpath)),
                    None => self.lookup_package_entry(&package_dir),
                };
            }
            if dir == self.root {
                break;
            }
            current = dir.parent();
        }

        Lookup::Missing
    }

    fn lookup_package_entry(&self, package_dir: &Path) -> Lookup {
        let manifest = std::fs::read_to_string(package_dir.join("package.json"))
            .ok()
            .and_then(|text| serde_json::from_str::<serde_json::Value>(&text).ok());

        if let Some(manifest) = manifest {
            // ESM-first: module, then a string browser field, then main
            for field in ["module", "browser", "main"] {
                if let Some(entry) = manifest.get(field).and_then(|v| v.as_str()) {
                    if let Lookup::Found(path) = self.lookup(&normalize(&package_dir.join(entry))) {
                        return Lookup::Found(path);
                    }
                }
            }
        }

        self.lookup(&package_dir.join("index"))
    }
}

enum Lookup {
    Found(PathBuf),
    Ambiguous(Vec<PathBuf>),
    Missing,
}

fn existing(candidates: impl Iterator<Item = PathBuf>) -> Vec<PathBuf> {
    candidates.filter(|p| p.is_file()).collect()
}

fn is_relative(reference: &str) -> bool {
    reference.starts_with("./") || reference.starts_with("../") || reference == "." || reference == ".."
}

fn strip_query(reference: &str) -> &str {
    reference
        .split(|c| c == '?' || c == '#')
        .next()
        .unwrap_or(reference)
}

fn append_extension(path: &Path, ext: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".");
    os.push(ext);
    PathBuf::from(os)
}

fn partial_of(path: &Path) -> PathBuf {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) if !name.starts_with('_') => path.with_file_name(format!("_{}", name)),
        _ => path.to_path_buf(),
    }
}

/// `@scope/pkg/sub/path` -> (`@scope/pkg`, `sub/path`)
fn split_package_specifier(specifier: &str) -> (String, Option<String>) {
    let segments: Vec<&str> = specifier.split('/').collect();
    let name_len = if specifier.starts_with('@') { 2 } else { 1 };

    if segments.len() <= name_len {
        return (specifier.to_string(), None);
    }

    (
        segments[..name_len].join("/"),
        Some(segments[name_len..].join("/")),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::KilnError;
    use std::fs;

    fn project() -> (tempfile::TempDir, AssetResolver) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("web/styles")).unwrap();
        fs::write(root.join("web/index.js"), "import './app.css';").unwrap();
        fs::write(root.join("web/app.css"), "body {}").unwrap();
        fs::write(root.join("web/util.js"), "export const x = 1;").unwrap();
        let resolver = AssetResolver::new(root);
        (dir, resolver)
    }

    #[test]
    fn test_relative_reference_resolves_with_content_type() {
        let (_dir, resolver) = project();
        let from = resolver.root.join("web/index.js");

        let node = resolver.resolve("./app.css", Some(&from)).unwrap();
        assert_eq!(node.id.as_str(), "web/app.css");
        assert_eq!(node.content_type, ContentType::Stylesheet);

        let node = resolver.resolve("./util", Some(&from)).unwrap();
        assert_eq!(node.id.as_str(), "web/util.js");
    }

    #[test]
    fn test_missing_reference_is_not_found() {
        let (_dir, resolver) = project();
        let from = resolver.root.join("web/index.js");

        let err = resolver.resolve("./missing.js", Some(&from)).unwrap_err();
        assert!(matches!(err, KilnError::Resolution(ResolutionError::NotFound { .. })));
        assert!(err.to_string().contains("web/index.js"));
    }

    #[test]
    fn test_extensionless_reference_with_two_candidates_is_ambiguous() {
        let (_dir, resolver) = project();
        fs::write(resolver.root.join("web/theme.css"), "a {}").unwrap();
        fs::write(resolver.root.join("web/theme.scss"), "a {}").unwrap();
        let from = resolver.root.join("web/index.js");

        let err = resolver.resolve("./theme", Some(&from)).unwrap_err();
        match err {
            KilnError::Resolution(ResolutionError::Ambiguous { candidates, .. }) => {
                assert_eq!(candidates.len(), 2)
            }
            other => panic!("expected ambiguity, got {}", other),
        }
    }

    #[test]
    fn test_unknown_extension_is_static_file() {
        let (_dir, resolver) = project();
        fs::write(resolver.root.join("web/logo.png"), [0u8, 1, 2]).unwrap();
        let from = resolver.root.join("web/index.js");

        let node = resolver.resolve("./logo.png?url", Some(&from)).unwrap();
        assert_eq!(node.content_type, ContentType::StaticFile);
    }

    #[test]
    fn test_style_import_finds_partial() {
        let (_dir, resolver) = project();
        fs::write(resolver.root.join("web/styles/_variables.scss"), "$c: red;").unwrap();
        let from = resolver.root.join("web/app.scss");

        let node = resolver.resolve_style_import("styles/variables", &from).unwrap();
        assert_eq!(node.id.as_str(), "web/styles/_variables.scss");
    }

    #[test]
    fn test_bare_specifier_uses_package_module_field() {
        let (_dir, resolver) = project();
        let package = resolver.root.join("node_modules/@acme/widgets");
        fs::create_dir_all(package.join("dist")).unwrap();
        fs::write(package.join("package.json"), r#"{"name":"@acme/widgets","module":"dist/index.mjs"}"#).unwrap();
        fs::write(package.join("dist/index.mjs"), "export default 1;").unwrap();
        let from = resolver.root.join("web/index.js");

        let node = resolver.resolve("@acme/widgets", Some(&from)).unwrap();
        assert_eq!(node.id.as_str(), "node_modules/@acme/widgets/dist/index.mjs");
    }

    #[test]
    fn test_split_package_specifier() {
        assert_eq!(split_package_specifier("lodash"), ("lodash".to_string(), None));
        assert_eq!(
            split_package_specifier("@babel/core/lib/index.js"),
            ("@babel/core".to_string(), Some("lib/index.js".to_string()))
        );
    }
}
