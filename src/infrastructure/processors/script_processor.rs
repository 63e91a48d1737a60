// Line-preserving rewrites of ES module source: reference extraction,
// binary artifact URLs and linking modules into a single bundle

use super::module_scan::scan_module;
use crate::core::models::DependencyKind;
use crate::utils::Logger;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;

static IMPORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*import\b\s*(?:([\w$*{},\s]+?)\s*from\s*)?(['"])([^'"\n]+)['"][ \t]*;?"#).unwrap()
});

static EXPORT_FROM_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*export\s*(\*(?:\s*as\s+[\w$]+)?|\{[^}]*\})\s*from\s*(['"])([^'"\n]+)['"][ \t]*;?"#).unwrap()
});

static DYNAMIC_IMPORT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bimport\s*\(\s*(['"])([^'"\n]+)['"]\s*\)"#).unwrap());

static WASM_LITERAL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(['"])([^'"\s]+\.wasm)(['"])"#).unwrap());

static EXPORT_DEFAULT_NAMED_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^([ \t]*)export\s+default\s+((?:async\s+)?function\s*\*?\s*([\w$]+)|class\s+([\w$]+))").unwrap()
});

static EXPORT_DEFAULT_EXPR_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^([ \t]*)export\s+default\s+").unwrap());

static EXPORT_DECL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^([ \t]*)export\s+((?:async\s+)?function\s*\*?\s*([\w$]+)|class\s+([\w$]+)|(?:const|let|var)\s+([\w$]+|\{[^}]*\}|\[[^\]]*\]))").unwrap()
});

static EXPORT_LIST_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*export\s*\{([^}]*)\}[ \t]*;?").unwrap());

static IDENTIFIER_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z_$][\w$]*").unwrap());

/// Local name holding an anonymous default export
pub const DEFAULT_EXPORT_LOCAL: &str = "__kiln_default";

/// Lines the module wrapper adds before the module body
pub const WRAPPER_PREFIX_LINES: u32 = 1;

/// Lines the registry declaration adds at the top of a bundle
pub const REGISTRY_LINES: u32 = 1;

/// A reference found in script source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptReference {
    pub specifier: String,
    pub kind: DependencyKind,
}

/// Static imports, re-exports, dynamic imports with a literal specifier and
/// `.wasm` string literals, in source order, deduplicated
pub fn extract_script_references(source: &str) -> Vec<ScriptReference> {
    let mut refs: Vec<ScriptReference> = Vec::new();
    let mut push = |specifier: &str, kind: DependencyKind| {
        if is_local_specifier(specifier)
            && !refs.iter().any(|r| r.specifier == specifier && r.kind == kind)
        {
            refs.push(ScriptReference {
                specifier: specifier.to_string(),
                kind,
            });
        }
    };

    let mut found: Vec<(usize, String, DependencyKind)> = Vec::new();
    for caps in IMPORT_REGEX.captures_iter(source) {
        found.push((caps.get(0).map_or(0, |m| m.start()), caps[3].to_string(), DependencyKind::Import));
    }
    for caps in EXPORT_FROM_REGEX.captures_iter(source) {
        found.push((caps.get(0).map_or(0, |m| m.start()), caps[3].to_string(), DependencyKind::Import));
    }
    for caps in DYNAMIC_IMPORT_REGEX.captures_iter(source) {
        found.push((caps.get(0).map_or(0, |m| m.start()), caps[2].to_string(), DependencyKind::Import));
    }
    for caps in WASM_LITERAL_REGEX.captures_iter(source) {
        let Some(m) = caps.get(0) else { continue };
        if caps[1] == caps[3] && !in_import_position(source, m.start()) {
            found.push((m.start(), caps[2].to_string(), DependencyKind::BinaryModule));
        }
    }

    found.sort_by_key(|(offset, _, _)| *offset);
    for (_, specifier, kind) in found {
        push(&specifier, kind);
    }
    refs
}

/// Point `.wasm` string literals at the emitted artifact. Literals that are
/// import specifiers are left for the linker.
pub fn rewrite_binary_references(code: &str, url: &str) -> String {
    WASM_LITERAL_REGEX
        .replace_all(code, |caps: &Captures| {
            let whole = &caps[0];
            let start = caps.get(0).map_or(0, |m| m.start());
            if caps[1] != caps[3] || !is_local_specifier(&caps[2]) || in_import_position(code, start) {
                whole.to_string()
            } else {
                format!("{}{}{}", &caps[1], url, &caps[3])
            }
        })
        .into_owned()
}

fn in_import_position(code: &str, offset: usize) -> bool {
    let before = code[..offset].trim_end();
    before.ends_with("from") || before.ends_with("import") || before.ends_with("import(")
}

fn is_local_specifier(specifier: &str) -> bool {
    !(specifier.starts_with("http://")
        || specifier.starts_with("https://")
        || specifier.starts_with("//")
        || specifier.starts_with("data:"))
}

/// What an import specifier turns into inside the bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportBinding {
    /// Another bundled module, held in the named registry variable
    Module(String),
    /// A URL string (static files, the binary artifact)
    Url(String),
    /// Nothing to bind (stylesheets are emitted separately)
    Omit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportBinding {
    Local { exported: String, local: String },
    Reexport { exported: String, module: String, imported: String },
    Namespace { exported: String, module: String },
    Star { module: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedModule {
    pub code: String,
    pub exports: Vec<ExportBinding>,
    /// Awaits at top level, so its wrapper must be async
    pub is_async: bool,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ImportClause {
    default: Option<String>,
    namespace: Option<String>,
    /// (imported, local)
    named: Vec<(String, String)>,
}

/// Rewrite imports to registry bindings and, outside the entry module,
/// exports to an export list. Line count is preserved.
///
/// Reads of imported names become member reads on the registry object
/// (`greet()` -> `__kiln_m0.greet()`), so bindings stay live and modules
/// in an import cycle only touch each other's exports when they run.
pub fn link_module(code: &str, bindings: &HashMap<String, ImportBinding>, is_entry: bool) -> LinkedModule {
    let imported = imported_names(code, bindings);
    let scan = scan_module(code);
    let is_async = scan.as_ref().is_some_and(|s| s.top_level_await);

    // Entry exports of imported names need a local to export
    let mut exported_imports: Vec<String> = Vec::new();
    let code = match &scan {
        Some(scan) => {
            let mut rewritten = code.to_string();
            for usage in scan.import_uses.iter().rev() {
                let Some(expr) = imported.get(&usage.name) else { continue };
                if usage.exported {
                    if !exported_imports.contains(&usage.name) {
                        exported_imports.push(usage.name.clone());
                    }
                    continue;
                }
                let replacement = if usage.shorthand {
                    format!("{}: {}", usage.name, expr)
                } else {
                    expr.clone()
                };
                rewritten.replace_range(usage.start..usage.end, &replacement);
            }
            rewritten
        }
        None => code.to_string(),
    };

    let mut exports = Vec::new();

    let code = EXPORT_FROM_REGEX.replace_all(&code, |caps: &Captures| {
        let whole = &caps[0];
        let Some(ImportBinding::Module(module)) = bindings.get(&caps[3]) else {
            return whole.to_string();
        };
        let clause = caps[1].trim();
        let replacement = if is_entry {
            entry_reexport(clause, module, &caps[3])
        } else {
            exports.extend(reexport_bindings(clause, module));
            String::new()
        };
        pad_lines(replacement, whole)
    });

    let code = IMPORT_REGEX.replace_all(&code, |caps: &Captures| {
        let whole = &caps[0];
        let clause = caps.get(1).map(|m| parse_clause(m.as_str())).unwrap_or_default();
        let replacement = match bindings.get(&caps[3]) {
            Some(ImportBinding::Module(module)) if scan.is_none() => module_import(&clause, module),
            Some(ImportBinding::Module(module)) if is_entry => clause_locals(&clause, module)
                .into_iter()
                .filter(|(local, _)| exported_imports.contains(local))
                .map(|(local, expr)| format!("const {} = {};", local, expr))
                .collect::<Vec<_>>()
                .join(" "),
            Some(ImportBinding::Module(_)) => String::new(),
            Some(ImportBinding::Url(url)) => match &clause.default {
                Some(local) => format!("const {} = {};", local, js_string(url)),
                None => String::new(),
            },
            Some(ImportBinding::Omit) => String::new(),
            None => return whole.to_string(),
        };
        pad_lines(replacement, whole)
    });

    let code = DYNAMIC_IMPORT_REGEX.replace_all(&code, |caps: &Captures| match bindings.get(&caps[2]) {
        Some(ImportBinding::Module(module)) => format!("Promise.resolve({})", module),
        Some(ImportBinding::Url(url)) => format!("Promise.resolve({{ default: {} }})", js_string(url)),
        Some(ImportBinding::Omit) => "Promise.resolve({})".to_string(),
        None => caps[0].to_string(),
    });

    if is_entry {
        return LinkedModule {
            code: code.into_owned(),
            exports,
            is_async,
        };
    }

    let code = EXPORT_DEFAULT_NAMED_REGEX.replace_all(&code, |caps: &Captures| {
        let name = caps.get(3).or_else(|| caps.get(4)).map_or("", |m| m.as_str());
        exports.push(ExportBinding::Local {
            exported: "default".to_string(),
            local: name.to_string(),
        });
        format!("{}{}", &caps[1], &caps[2])
    });

    let code = EXPORT_DEFAULT_EXPR_REGEX.replace_all(&code, |caps: &Captures| {
        exports.push(ExportBinding::Local {
            exported: "default".to_string(),
            local: DEFAULT_EXPORT_LOCAL.to_string(),
        });
        format!("{}const {} = ", &caps[1], DEFAULT_EXPORT_LOCAL)
    });

    let code = EXPORT_DECL_REGEX.replace_all(&code, |caps: &Captures| {
        if let Some(name) = caps.get(3).or_else(|| caps.get(4)) {
            exports.push(local_export(name.as_str(), name.as_str()));
        } else if let Some(pattern) = caps.get(5) {
            for name in declared_names(pattern.as_str()) {
                exports.push(local_export(&name, &name));
            }
        }
        format!("{}{}", &caps[1], &caps[2])
    });

    let code = EXPORT_LIST_REGEX.replace_all(&code, |caps: &Captures| {
        for (local, exported) in parse_specifiers(&caps[1]) {
            // An imported name is exported straight from its registry object
            let local = match (&scan, imported.get(&local)) {
                (Some(_), Some(expr)) => expr.clone(),
                _ => local,
            };
            exports.push(local_export(&exported, &local));
        }
        pad_lines(String::new(), &caps[0])
    });

    LinkedModule {
        code: code.into_owned(),
        exports,
        is_async,
    }
}

/// `const __kiln_m0 = {}, __kiln_m1 = {};` declared ahead of every module,
/// so any module may reference any registry object
pub fn registry_declaration(vars: &[String]) -> String {
    let slots: Vec<String> = vars.iter().map(|v| format!("{} = {{}}", v)).collect();
    format!("const {};\n", slots.join(", "))
}

/// Wrap a linked module in a function scope that first defines its exports
/// as getters on the registry object `var`, then runs the module body
pub fn wrap_module(var: &str, linked: &LinkedModule) -> String {
    let mut properties = Vec::new();
    let mut stars = Vec::new();
    for export in &linked.exports {
        let (exported, getter) = match export {
            ExportBinding::Star { module } => {
                stars.push(module.as_str());
                continue;
            }
            ExportBinding::Local { exported, local } => (exported, local.clone()),
            ExportBinding::Reexport { exported, module, imported } => (exported, member(module, imported)),
            ExportBinding::Namespace { exported, module } => (exported, module.clone()),
        };
        properties.push(format!(
            "{}: {{ get: () => {}, enumerable: true }}",
            js_string(exported.trim_matches(|c| c == '"' || c == '\'')),
            getter
        ));
    }

    let mut prefix = String::new();
    if !properties.is_empty() {
        prefix.push_str(&format!(" Object.defineProperties({}, {{ {} }});", var, properties.join(", ")));
    }
    for module in stars {
        // Own exports win over `export *`, as in ES modules
        prefix.push_str(&format!(
            " for (const k of Object.keys({m})) if (k !== \"default\" && !(k in {v})) Object.defineProperty({v}, k, {{ get: () => {m}[k], enumerable: true }});",
            m = module,
            v = var
        ));
    }

    let mut body = linked.code.clone();
    if !body.ends_with('\n') {
        body.push('\n');
    }

    let (open, close) = if linked.is_async {
        ("await (async function () {", "})();")
    } else {
        ("(function () {", "})();")
    };
    format!("{}{}\n{}{}\n", open, prefix, body, close)
}

/// Local name -> expression reading it from the registry, for every import
/// of a bundled module
fn imported_names(code: &str, bindings: &HashMap<String, ImportBinding>) -> HashMap<String, String> {
    let mut names = HashMap::new();
    for caps in IMPORT_REGEX.captures_iter(code) {
        let Some(ImportBinding::Module(module)) = bindings.get(&caps[3]) else {
            continue;
        };
        let clause = caps.get(1).map(|m| parse_clause(m.as_str())).unwrap_or_default();
        names.extend(clause_locals(&clause, module));
    }
    names
}

fn clause_locals(clause: &ImportClause, module: &str) -> Vec<(String, String)> {
    let mut locals = Vec::new();
    if let Some(local) = &clause.default {
        locals.push((local.clone(), format!("{}.default", module)));
    }
    if let Some(local) = &clause.namespace {
        locals.push((local.clone(), module.to_string()));
    }
    for (imported, local) in &clause.named {
        locals.push((local.clone(), member(module, imported)));
    }
    locals
}

/// `m.name`, or `m["a-b"]` for string export names
fn member(module: &str, name: &str) -> String {
    if name.starts_with('"') || name.starts_with('\'') {
        format!("{}[{}]", module, js_string(name.trim_matches(|c| c == '"' || c == '\'')))
    } else {
        format!("{}.{}", module, name)
    }
}

fn local_export(exported: &str, local: &str) -> ExportBinding {
    ExportBinding::Local {
        exported: exported.to_string(),
        local: local.to_string(),
    }
}

fn module_import(clause: &ImportClause, module: &str) -> String {
    let mut parts = Vec::new();
    if let Some(local) = &clause.default {
        parts.push(format!("const {} = {}.default;", local, module));
    }
    if let Some(local) = &clause.namespace {
        parts.push(format!("const {} = {};", local, module));
    }
    if !clause.named.is_empty() {
        parts.push(format!("const {{ {} }} = {};", destructure(&clause.named), module));
    }
    parts.join(" ")
}

fn entry_reexport(clause: &str, module: &str, specifier: &str) -> String {
    if let Some(rest) = clause.strip_prefix('*') {
        match rest.trim().strip_prefix("as") {
            Some(name) => format!("export const {} = {};", name.trim(), module),
            None => {
                Logger::warn(&format!(
                    "`export * from '{}'` in an entry module is not supported; its names are not re-exported",
                    specifier
                ));
                String::new()
            }
        }
    } else {
        let named = parse_specifiers(clause.trim_start_matches('{').trim_end_matches('}'));
        format!("export const {{ {} }} = {};", destructure(&named), module)
    }
}

fn reexport_bindings(clause: &str, module: &str) -> Vec<ExportBinding> {
    if let Some(rest) = clause.strip_prefix('*') {
        return match rest.trim().strip_prefix("as") {
            Some(name) => vec![ExportBinding::Namespace {
                exported: name.trim().to_string(),
                module: module.to_string(),
            }],
            None => vec![ExportBinding::Star {
                module: module.to_string(),
            }],
        };
    }

    parse_specifiers(clause.trim_start_matches('{').trim_end_matches('}'))
        .into_iter()
        .map(|(imported, exported)| ExportBinding::Reexport {
            exported,
            module: module.to_string(),
            imported,
        })
        .collect()
}

fn destructure(named: &[(String, String)]) -> String {
    named
        .iter()
        .map(|(imported, local)| {
            if imported == local {
                local.clone()
            } else {
                format!("{}: {}", imported, local)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn parse_clause(clause: &str) -> ImportClause {
    let clause = clause.trim();
    let mut parsed = ImportClause::default();

    let rest = match (clause.find('{'), clause.rfind('}')) {
        (Some(open), Some(close)) if open < close => {
            parsed.named = parse_specifiers(&clause[open + 1..close]);
            format!("{} {}", &clause[..open], &clause[close + 1..])
        }
        _ => clause.to_string(),
    };

    for part in rest.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if let Some(ns) = part.strip_prefix('*') {
            parsed.namespace = ns.trim().strip_prefix("as").map(|n| n.trim().to_string());
        } else {
            parsed.default = Some(part.to_string());
        }
    }

    parsed
}

/// `a, b as c` -> [(a, a), (b, c)]
fn parse_specifiers(list: &str) -> Vec<(String, String)> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|spec| {
            let words: Vec<&str> = spec.split_whitespace().collect();
            match words.as_slice() {
                [name] => Some((name.to_string(), name.to_string())),
                [from, "as", to] => Some((from.to_string(), to.to_string())),
                _ => None,
            }
        })
        .collect()
}

/// Names bound by `x`, `{ a, b: c }` or `[d, e]`
fn declared_names(pattern: &str) -> Vec<String> {
    if !(pattern.starts_with('{') || pattern.starts_with('[')) {
        return vec![pattern.to_string()];
    }
    pattern
        .trim_matches(|c| c == '{' || c == '}' || c == '[' || c == ']')
        .split(',')
        .filter_map(|part| {
            // `b: c` binds c; `d = 1` binds d
            let binding = part.rsplit(':').next().unwrap_or(part);
            let binding = binding.split('=').next().unwrap_or(binding);
            IDENTIFIER_REGEX.find(binding.trim()).map(|m| m.as_str().to_string())
        })
        .collect()
}

fn pad_lines(mut replacement: String, original: &str) -> String {
    let needed = original.matches('\n').count();
    let present = replacement.matches('\n').count();
    for _ in present..needed {
        replacement.push('\n');
    }
    replacement
}

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value))
}
