use crate::core::context::BuildContext;
use crate::core::models::{ChunkKind, ContentType, DependencyKind, Graph, ModuleId, ModuleNode, OutputChunk, TransformedOutput};
use crate::infrastructure::processors::{
    link_module, registry_declaration, wrap_module, ImportBinding, REGISTRY_LINES, WRAPPER_PREFIX_LINES,
};
use crate::utils::{Logger, Result, SourceMapBuilder};
use std::collections::{HashMap, HashSet};

/// Directory of per-stylesheet files in development builds
pub const DEV_STYLE_DIR: &str = "__kiln/styles";

/// Groups graph nodes into output chunks. Filenames may still contain
/// `[hash]`, which the emitter fills in once contents are final.
pub fn assemble(graph: &Graph, context: &BuildContext) -> Result<Vec<OutputChunk>> {
    let mut chunks = Vec::new();

    for (name, entry) in &graph.entries {
        chunks.push(script_chunk(graph, context, name, entry));
        if context.mode.is_production() {
            if let Some(chunk) = style_chunk(graph, context, name, entry) {
                chunks.push(chunk);
            }
        }
    }

    if !context.mode.is_production() {
        chunks.extend(injectable_style_chunks(graph));
    }

    for node in graph.nodes.values() {
        match &node.output {
            Some(TransformedOutput::Binary { bytes, filename }) => chunks.push(OutputChunk::new(
                filename.clone(),
                ChunkKind::BinaryModule,
                filename.clone(),
                vec![node.id.clone()],
                bytes.to_vec(),
            )),
            Some(TransformedOutput::Copy { target, bytes }) => chunks.push(OutputChunk::new(
                target.clone(),
                ChunkKind::StaticFile,
                target.clone(),
                vec![node.id.clone()],
                bytes.to_vec(),
            )),
            _ => {}
        }
    }

    Ok(chunks)
}

pub fn render_filename(template: &str, name: &str) -> String {
    template.replace("[name]", name)
}

/// Every script reachable from the entry, dependencies first, each wrapped
/// in its own scope; the entry itself stays at module top level. Registry
/// objects for all wrapped modules are declared before any of them runs.
fn script_chunk(graph: &Graph, context: &BuildContext, name: &str, entry: &ModuleId) -> OutputChunk {
    let order: Vec<&ModuleNode> = graph
        .post_order(entry, &[DependencyKind::Import])
        .iter()
        .filter_map(|id| graph.get(id))
        .filter(|n| matches!(n.output, Some(TransformedOutput::Script { .. })))
        .collect();

    let vars: HashMap<&ModuleId, String> = order
        .iter()
        .enumerate()
        .filter(|(_, n)| &n.id != entry)
        .map(|(i, n)| (&n.id, format!("__kiln_m{}", i)))
        .collect();

    let filename = render_filename(&context.script_filename, name);
    let mut code = String::new();
    let mut line: u32 = 0;
    let mut map = SourceMapBuilder::new();

    let registry: Vec<String> = order.iter().filter_map(|n| vars.get(&n.id).cloned()).collect();
    if !registry.is_empty() {
        code.push_str(&registry_declaration(&registry));
        line += REGISTRY_LINES;
    }

    for node in &order {
        let Some(TransformedOutput::Script { code: module_code }) = &node.output else {
            continue;
        };

        let bindings = import_bindings(graph, context, node, &vars);
        let is_entry = &node.id == entry;
        let linked = link_module(module_code, &bindings, is_entry);

        code.push_str(&format!("// {}\n", node.id));
        line += 1;

        let body_start = if is_entry { line } else { line + WRAPPER_PREFIX_LINES };
        let text = match vars.get(&node.id) {
            Some(var) => wrap_module(var, &linked),
            None => {
                let mut text = linked.code.clone();
                if !text.ends_with('\n') {
                    text.push('\n');
                }
                text
            }
        };

        let source = map.add_source(node.id.as_str(), node.source.as_deref().unwrap_or(""));
        for original in 0..linked.code.lines().count() as u32 {
            map.add_mapping(body_start + original, 0, source, original, 0);
        }

        line += text.matches('\n').count() as u32;
        code.push_str(&text);
    }

    let members = order.iter().map(|n| n.id.clone()).collect();
    let map = context.source_maps.enabled().then(|| map.build(Some(filename.clone())));
    OutputChunk::new(name, ChunkKind::Script, filename, members, code.into_bytes()).with_map(map)
}

fn import_bindings(
    graph: &Graph,
    context: &BuildContext,
    node: &ModuleNode,
    vars: &HashMap<&ModuleId, String>,
) -> HashMap<String, ImportBinding> {
    let mut bindings = HashMap::new();

    for dep in &node.dependencies {
        let Some(target) = graph.get(&dep.target) else { continue };
        let binding = match (&target.output, target.content_type) {
            (Some(TransformedOutput::Script { .. }), _) => match vars.get(&target.id) {
                Some(var) => ImportBinding::Module(var.clone()),
                None => {
                    Logger::warn(&format!(
                        "{} imports its entry module {}; the import is left unbound",
                        node.id, target.id
                    ));
                    ImportBinding::Omit
                }
            },
            (Some(TransformedOutput::Copy { target: file, .. }), _) => ImportBinding::Url(context.public_url(file)),
            (Some(TransformedOutput::Binary { filename, .. }), _) => ImportBinding::Url(context.public_url(filename)),
            (_, ContentType::Stylesheet) => ImportBinding::Omit,
            _ => continue,
        };
        bindings.insert(dep.specifier.clone(), binding);
    }

    bindings
}

/// Production: every extracted stylesheet reachable from the entry, in
/// dependency order, in one file
fn style_chunk(graph: &Graph, context: &BuildContext, name: &str, entry: &ModuleId) -> Option<OutputChunk> {
    let styles: Vec<(&ModuleNode, &String)> = graph
        .post_order(entry, &[DependencyKind::Import])
        .iter()
        .filter_map(|id| graph.get(id))
        .filter_map(|n| match &n.output {
            Some(TransformedOutput::Style { css, .. }) => Some((n, css)),
            _ => None,
        })
        .collect();

    if styles.is_empty() {
        return None;
    }

    let filename = render_filename(&context.style_filename, name);
    let mut css = String::new();
    let mut map = SourceMapBuilder::new();
    let mut line: u32 = 0;

    for (node, text) in &styles {
        let source = map.add_source(node.id.as_str(), node.source.as_deref().unwrap_or(""));
        for generated in 0..text.lines().count() as u32 {
            map.add_mapping(line + generated, 0, source, 0, 0);
        }
        css.push_str(text);
        if !css.ends_with('\n') {
            css.push('\n');
        }
        line = css.matches('\n').count() as u32;
    }

    let members = styles.iter().map(|(n, _)| n.id.clone()).collect();
    let map = context.source_maps.enabled().then(|| map.build(Some(filename.clone())));
    Some(OutputChunk::new(name, ChunkKind::Stylesheet, filename, members, css.into_bytes()).with_map(map))
}

/// Development: one file per stylesheet, so a change replaces exactly one
/// `<link>` and leaves the bundles untouched
fn injectable_style_chunks(graph: &Graph) -> Vec<OutputChunk> {
    let mut seen = HashSet::new();
    let mut chunks = Vec::new();

    for (_, entry) in &graph.entries {
        for id in graph.post_order(entry, &[DependencyKind::Import]) {
            let Some(node) = graph.get(&id) else { continue };
            let Some(TransformedOutput::InjectableStyle { style_id, css, map }) = &node.output else {
                continue;
            };
            if !seen.insert(style_id.clone()) {
                continue;
            }
            let filename = dev_style_filename(style_id);
            chunks.push(
                OutputChunk::new(style_id.clone(), ChunkKind::Stylesheet, filename, vec![id.clone()], css.clone().into_bytes())
                    .with_map(map.clone()),
            );
        }
    }

    chunks
}

pub fn dev_style_filename(style_id: &str) -> String {
    format!("{}/{}.css", DEV_STYLE_DIR, style_id)
}
