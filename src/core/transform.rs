use crate::core::context::{BuildContext, TransformStep};
use crate::core::interfaces::{StyleNormalizer, StylePreprocessor};
use crate::core::models::{ContentType, DependencyKind, ModuleNode, TransformedOutput};
use crate::infrastructure::processors::{rewrite_binary_references, strip_local_imports, validate_script};
use crate::utils::{file_level_map, KilnError, Logger, Result, SourceMap, TransformError};
use std::sync::Arc;

/// Runs each node through the chain its content type maps to
#[derive(Clone)]
pub struct TransformDispatcher {
    preprocessor: Arc<dyn StylePreprocessor>,
    normalizer: Arc<dyn StyleNormalizer>,
}

impl TransformDispatcher {
    pub fn new(preprocessor: Arc<dyn StylePreprocessor>, normalizer: Arc<dyn StyleNormalizer>) -> Self {
        Self {
            preprocessor,
            normalizer,
        }
    }

    pub fn transform(&self, node: &ModuleNode, context: &BuildContext) -> Result<TransformedOutput> {
        let chain = context.chain(node.content_type);
        if chain.is_empty() {
            return Err(unsupported(node));
        }

        Logger::transforming(
            &node.path,
            &chain.iter().map(|s| format!("{:?}", s)).collect::<Vec<_>>().join(" → "),
        );

        match node.content_type {
            ContentType::Script => self.transform_script(node, chain, context),
            ContentType::Stylesheet => self.transform_style(node, chain, context),
            ContentType::StaticFile => Ok(TransformedOutput::Copy {
                target: static_target(node, context),
                bytes: payload(node)?,
            }),
            ContentType::BinaryModule => Ok(TransformedOutput::Binary {
                bytes: payload(node)?,
                filename: context.artifact_name.clone(),
            }),
        }
    }

    fn transform_script(&self, node: &ModuleNode, chain: &[TransformStep], context: &BuildContext) -> Result<TransformedOutput> {
        let source = node.source.as_deref().ok_or_else(|| unsupported(node))?;
        let mut code = source.to_string();

        for step in chain {
            match step {
                TransformStep::ValidateScript => validate_script(&code, &node.path)?,
                TransformStep::RewriteBinaryReferences => {
                    if node.dependencies.iter().any(|d| d.kind == DependencyKind::BinaryModule) {
                        code = rewrite_binary_references(&code, &context.artifact_url());
                    }
                }
                other => return Err(misplaced(node, *other)),
            }
        }

        Ok(TransformedOutput::Script { code })
    }

    fn transform_style(&self, node: &ModuleNode, chain: &[TransformStep], context: &BuildContext) -> Result<TransformedOutput> {
        let source = node.source.as_deref().ok_or_else(|| unsupported(node))?;
        let maps = context.source_maps.enabled();
        let mut css = source.to_string();
        let mut map: Option<SourceMap> = None;

        for step in chain {
            match step {
                TransformStep::Preprocess => {
                    if self.preprocessor.handles(&node.path) {
                        let out = self.preprocessor.preprocess(&node.path, maps)?;
                        css = out.css;
                        map = out.map;
                    }
                }
                TransformStep::Normalize => {
                    css = self.normalizer.normalize(&strip_local_imports(&css), &node.path)?;
                }
                TransformStep::Extract => {
                    let map = attach_map(map, maps, node, source, &css);
                    return Ok(TransformedOutput::Style { css, map });
                }
                TransformStep::WrapForInjection => {
                    let map = attach_map(map, maps, node, source, &css);
                    return Ok(TransformedOutput::InjectableStyle {
                        style_id: style_id(node),
                        css,
                        map,
                    });
                }
                other => return Err(misplaced(node, *other)),
            }
        }

        // A chain without a final step yields plain stylesheet text
        let map = attach_map(map, maps, node, source, &css);
        Ok(TransformedOutput::Style { css, map })
    }
}

/// Stable per-source identifier of an injected stylesheet:
/// `<8 hex chars of the id digest>-<file stem>`
pub fn style_id(node: &ModuleNode) -> String {
    let digest = blake3::hash(node.id.as_str().as_bytes()).to_hex();
    let stem = node
        .path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("style");
    format!("{}-{}", &digest[..8], stem)
}

/// Where a static file lands below the output directory: its path under
/// the static root, the favicon's own name, or `assets/<name>` for files
/// imported from scripts
pub fn static_target(node: &ModuleNode, context: &BuildContext) -> String {
    let name = node
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if let Some(relative) = context
        .static_dir
        .as_ref()
        .and_then(|dir| node.path.strip_prefix(dir).ok())
    {
        let relative: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        return context.static_target(&relative.join("/"));
    }

    if context.favicon.as_deref() == Some(node.path.as_path()) {
        return name;
    }

    format!("assets/{}", name)
}

fn attach_map(map: Option<SourceMap>, enabled: bool, node: &ModuleNode, source: &str, css: &str) -> Option<SourceMap> {
    if !enabled {
        return None;
    }
    map.or_else(|| {
        let file = node
            .path
            .file_stem()
            .map(|s| format!("{}.css", s.to_string_lossy()))
            .unwrap_or_else(|| "style.css".to_string());
        Some(file_level_map(&file, node.id.as_str(), source, css))
    })
}

fn payload(node: &ModuleNode) -> Result<Arc<Vec<u8>>> {
    node.raw.clone().ok_or_else(|| unsupported(node))
}

fn unsupported(node: &ModuleNode) -> KilnError {
    TransformError::UnsupportedType {
        path: node.path.clone(),
        content_type: node.content_type.to_string(),
    }
    .into()
}

fn misplaced(node: &ModuleNode, step: TransformStep) -> KilnError {
    TransformError::UnsupportedType {
        path: node.path.clone(),
        content_type: format!("{} with step {:?}", node.content_type, step),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{Dependency, Mode, ModuleId};
    use crate::infrastructure::processors::{GrassPreprocessor, LightningCssProcessor};
    use crate::utils::{CliOverrides, ConfigLoader};
    use std::fs;
    use std::path::{Path, PathBuf};

    fn dispatcher() -> TransformDispatcher {
        TransformDispatcher::new(Arc::new(GrassPreprocessor::new()), Arc::new(LightningCssProcessor::new()))
    }

    fn context(root: &Path, mode: Mode, source_maps: bool) -> BuildContext {
        let config = ConfigLoader::merge_with_cli(
            None,
            root.to_path_buf(),
            CliOverrides {
                mode: Some(mode),
                source_maps: Some(source_maps),
                ..Default::default()
            },
        );
        BuildContext::from_config(&config).unwrap()
    }

    fn text_node(root: &Path, relative: &str, source: &str) -> ModuleNode {
        let path = root.join(relative);
        let mut node = ModuleNode::new(ModuleId::from_path(root, &path), path.clone(), ContentType::from_path(&path));
        node.source = Some(Arc::from(source));
        node
    }

    #[test]
    fn test_script_binary_references_point_at_artifact() {
        let root = PathBuf::from("/project");
        let mut node = text_node(&root, "pkg/app.js", "export default function init() { return new URL('app_bg.wasm', import.meta.url); }");
        node.dependencies.push(Dependency {
            specifier: "app_bg.wasm".to_string(),
            target: ModuleId::native("app.wasm"),
            kind: DependencyKind::BinaryModule,
        });

        let out = dispatcher().transform(&node, &context(&root, Mode::Production, false)).unwrap();
        match out {
            TransformedOutput::Script { code } => assert!(code.contains("new URL('/app.wasm'")),
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[test]
    fn test_script_syntax_error_is_fatal() {
        let root = PathBuf::from("/project");
        let node = text_node(&root, "web/index.js", "const = ;");

        let err = dispatcher().transform(&node, &context(&root, Mode::Production, false)).unwrap_err();
        assert!(matches!(err, KilnError::Transform(TransformError::SyntaxError { .. })));
    }

    #[test]
    fn test_production_style_is_extracted() {
        let root = PathBuf::from("/project");
        let node = text_node(&root, "web/app.css", "@import './reset.css';\n.app { user-select: none; }");

        let out = dispatcher().transform(&node, &context(&root, Mode::Production, true)).unwrap();
        match out {
            TransformedOutput::Style { css, map } => {
                assert!(!css.contains("reset.css"));
                assert!(css.contains("-webkit-user-select"));
                assert_eq!(map.unwrap().sources, vec!["web/app.css"]);
            }
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[test]
    fn test_style_chain_without_final_step_yields_plain_css() {
        let root = PathBuf::from("/project");
        let node = text_node(&root, "web/app.css", ".app { color: red; }");
        let ctx = context(&root, Mode::Development, true);

        let out = dispatcher()
            .transform_style(&node, &[TransformStep::Preprocess, TransformStep::Normalize], &ctx)
            .unwrap();
        match out {
            TransformedOutput::Style { css, map } => {
                assert!(css.contains(".app"));
                assert_eq!(map.unwrap().sources, vec!["web/app.css"]);
            }
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[test]
    fn test_development_style_is_injectable_with_stable_id() {
        let root = PathBuf::from("/project");
        let node = text_node(&root, "web/app.css", ".app { color: red; }");
        let ctx = context(&root, Mode::Development, false);

        let first = dispatcher().transform(&node, &ctx).unwrap();
        let edited = text_node(&root, "web/app.css", ".app { color: blue; }");
        let second = dispatcher().transform(&edited, &ctx).unwrap();

        match (first, second) {
            (
                TransformedOutput::InjectableStyle { style_id: a, map, .. },
                TransformedOutput::InjectableStyle { style_id: b, css, .. },
            ) => {
                assert_eq!(a, b);
                assert!(a.ends_with("-app"));
                assert_eq!(a.len(), 12);
                assert!(map.is_none());
                assert!(css.contains("#00f") || css.contains("blue"));
            }
            other => panic!("unexpected outputs {:?}", other),
        }
    }

    #[test]
    fn test_scss_is_preprocessed_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        fs::create_dir_all(root.join("web")).unwrap();
        fs::write(root.join("web/_vars.scss"), "$accent: #ff0000;").unwrap();
        let source = "@use 'vars';\n.btn { &:hover { color: vars.$accent; } }";
        fs::write(root.join("web/app.scss"), source).unwrap();
        let node = text_node(&root, "web/app.scss", source);

        let out = dispatcher().transform(&node, &context(&root, Mode::Production, false)).unwrap();
        match out {
            TransformedOutput::Style { css, .. } => {
                assert!(css.contains(".btn:hover"));
                assert!(css.contains("red") || css.contains("#f00"));
            }
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[test]
    fn test_static_targets() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        fs::create_dir_all(root.join("web/static/img")).unwrap();
        let ctx = context(&root, Mode::Production, false);

        let mut in_static = ModuleNode::new(
            ModuleId::from_path(&root, &root.join("web/static/img/logo.png")),
            root.join("web/static/img/logo.png"),
            ContentType::StaticFile,
        );
        in_static.raw = Some(Arc::new(vec![1, 2, 3]));
        match dispatcher().transform(&in_static, &ctx).unwrap() {
            TransformedOutput::Copy { target, bytes } => {
                assert_eq!(target, "img/logo.png");
                assert_eq!(bytes.as_slice(), &[1, 2, 3]);
            }
            other => panic!("unexpected output {:?}", other),
        }

        let imported = ModuleNode::new(
            ModuleId::from_path(&root, &root.join("web/hero.jpg")),
            root.join("web/hero.jpg"),
            ContentType::StaticFile,
        );
        assert_eq!(static_target(&imported, &ctx), "assets/hero.jpg");
    }
}
