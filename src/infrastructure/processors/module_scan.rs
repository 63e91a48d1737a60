// Scope analysis of a script with oxc_semantic: where its imported
// bindings are read and whether it awaits at module top level

use oxc_allocator::Allocator;
use oxc_ast::AstKind;
use oxc_parser::Parser;
use oxc_semantic::{ScopeFlags, ScopeId, Scoping, SemanticBuilder, SymbolFlags};
use oxc_span::{GetSpan, SourceType};

/// One read of an imported binding, as a byte range of the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingUse {
    pub name: String,
    pub start: usize,
    pub end: usize,
    /// `{ name }` inside an object literal
    pub shorthand: bool,
    /// `export { name }`
    pub exported: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ModuleScan {
    /// Sorted by position
    pub import_uses: Vec<BindingUse>,
    pub top_level_await: bool,
}

/// `None` when the code does not parse as an ES module
pub fn scan_module(code: &str) -> Option<ModuleScan> {
    let allocator = Allocator::default();
    let parsed = Parser::new(&allocator, code, SourceType::mjs()).parse();
    if parsed.panicked || !parsed.errors.is_empty() {
        return None;
    }

    let semantic = SemanticBuilder::new().build(&parsed.program).semantic;
    let scoping = semantic.scoping();
    let nodes = semantic.nodes();
    let root = scoping.root_scope_id();

    let mut import_uses = Vec::new();
    for symbol in scoping.symbol_ids() {
        if scoping.symbol_scope_id(symbol) != root || !scoping.symbol_flags(symbol).contains(SymbolFlags::Import) {
            continue;
        }
        let name = scoping.symbol_name(symbol);
        for &reference in scoping.get_resolved_reference_ids(symbol) {
            let node_id = scoping.get_reference(reference).node_id();
            let span = nodes.kind(node_id).span();
            let (shorthand, exported) = match nodes.parent_kind(node_id) {
                AstKind::ObjectProperty(property) => (property.shorthand, false),
                AstKind::ExportSpecifier(_) => (false, true),
                _ => (false, false),
            };
            import_uses.push(BindingUse {
                name: name.to_string(),
                start: span.start as usize,
                end: span.end as usize,
                shorthand,
                exported,
            });
        }
    }
    import_uses.sort_by_key(|u| u.start);

    let top_level_await = nodes.iter().any(|node| {
        let awaits = match node.kind() {
            AstKind::AwaitExpression(_) => true,
            AstKind::ForOfStatement(statement) => statement.r#await,
            _ => false,
        };
        awaits && !inside_function(scoping, node.scope_id())
    });

    Some(ModuleScan {
        import_uses,
        top_level_await,
    })
}

fn inside_function(scoping: &Scoping, scope: ScopeId) -> bool {
    let function_like = ScopeFlags::Function | ScopeFlags::Arrow | ScopeFlags::ClassStaticBlock;
    scoping
        .scope_ancestors(scope)
        .any(|id| scoping.scope_flags(id).intersects(function_like))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_uses_skip_shadowed_names() {
        let code = "import { a } from './a.js';\nconst b = a + 1;\nfunction f(a) { return a; }\nexport { a };\nconst o = { a };\n";
        let scan = scan_module(code).unwrap();

        let uses: Vec<(&str, bool, bool)> = scan
            .import_uses
            .iter()
            .map(|u| (&code[u.start..u.end], u.shorthand, u.exported))
            .collect();
        assert_eq!(uses, vec![("a", false, false), ("a", false, true), ("a", true, false)]);
        assert_eq!(scan.import_uses[0].start, code.find("a + 1").unwrap());
        assert!(!scan.top_level_await);
    }

    #[test]
    fn test_top_level_await() {
        assert!(scan_module("export const ready = await Promise.resolve(1);\n").unwrap().top_level_await);
        assert!(scan_module("for await (const x of xs) {}\n").unwrap().top_level_await);
        assert!(scan_module("if (ok) { await go(); }\n").unwrap().top_level_await);
        assert!(!scan_module("async function f() { await go(); }\nconst g = async () => await go();\n").unwrap().top_level_await);
    }

    #[test]
    fn test_unparsable_code() {
        assert!(scan_module("export function (").is_none());
    }
}
