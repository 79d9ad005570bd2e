//! Per-extension language rules: the grammar to load, which
//! node kinds may become top-level chunks, which nested kinds to descend
//! into when a chunk is oversized, which kinds count as "important
//! variables", and the doc-comment pattern for metadata extraction.
//!
//! Modeled as a `LanguageDriver`/`LanguageConfig` registry, narrowed to what
//! the chunker needs rather than a broader skeleton-rendering surface.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

/// Node kinds that subdivide a too-large container, keyed by the parent's
/// own node kind.
pub type SubdivisionMap = HashMap<&'static str, &'static [&'static str]>;

pub struct LanguageRule {
    pub name: &'static str,
    pub extensions: &'static [&'static str],
    pub language: fn() -> tree_sitter::Language,
    /// Node kinds eligible to become a chunk at the top level.
    pub node_types: &'static [&'static str],
    /// Node kinds considered "container" types (own semantic group, never
    /// merged with siblings before the grouping pass runs).
    pub container_types: &'static [&'static str],
    pub subdivision_types: SubdivisionMap,
    pub variable_types: &'static [&'static str],
    /// Doc-comment regex; the chunker searches the 500 bytes preceding a
    /// node for the last match.
    pub comment_pattern: &'static str,
}

impl LanguageRule {
    pub fn is_chunkable(&self, kind: &str) -> bool {
        self.node_types.contains(&kind)
    }

    pub fn is_container(&self, kind: &str) -> bool {
        self.container_types.contains(&kind)
    }

    pub fn subdivisions_for(&self, parent_kind: &str) -> Option<&'static [&'static str]> {
        self.subdivision_types.get(parent_kind).copied()
    }
}

fn rust_subdivisions() -> SubdivisionMap {
    let mut m: SubdivisionMap = HashMap::new();
    m.insert("impl_item", &["function_item"]);
    m.insert("trait_item", &["function_item", "function_signature_item"]);
    m.insert("mod_item", &["function_item", "struct_item", "enum_item", "impl_item"]);
    m
}

fn ts_subdivisions() -> SubdivisionMap {
    let mut m: SubdivisionMap = HashMap::new();
    m.insert("class_declaration", &["method_definition", "public_field_definition"]);
    m.insert("class_body", &["method_definition", "public_field_definition"]);
    m.insert("interface_declaration", &["method_signature", "property_signature"]);
    m
}

fn python_subdivisions() -> SubdivisionMap {
    let mut m: SubdivisionMap = HashMap::new();
    m.insert("class_definition", &["function_definition"]);
    m
}

fn go_subdivisions() -> SubdivisionMap {
    HashMap::new()
}

fn java_subdivisions() -> SubdivisionMap {
    let mut m: SubdivisionMap = HashMap::new();
    m.insert("class_declaration", &["method_declaration", "field_declaration", "constructor_declaration"]);
    m.insert("interface_declaration", &["method_declaration"]);
    m
}

fn csharp_subdivisions() -> SubdivisionMap {
    let mut m: SubdivisionMap = HashMap::new();
    m.insert("class_declaration", &["method_declaration", "property_declaration", "constructor_declaration"]);
    m
}

fn php_subdivisions() -> SubdivisionMap {
    let mut m: SubdivisionMap = HashMap::new();
    m.insert("class_declaration", &["method_declaration", "property_declaration"]);
    m
}

fn rust_rule() -> LanguageRule {
    LanguageRule {
        name: "rust",
        extensions: &["rs"],
        language: || tree_sitter_rust::LANGUAGE.into(),
        node_types: &["function_item", "struct_item", "enum_item", "trait_item", "impl_item", "mod_item", "const_item", "static_item"],
        container_types: &["impl_item", "trait_item", "mod_item"],
        subdivision_types: rust_subdivisions(),
        variable_types: &["let_declaration", "const_item", "static_item"],
        comment_pattern: r"(?m)^\s*///.*$|^\s*//!.*$|/\*\*[\s\S]*?\*/",
    }
}

fn typescript_rule() -> LanguageRule {
    LanguageRule {
        name: "typescript",
        extensions: &["ts", "tsx", "js", "jsx", "mjs", "cjs"],
        language: || tree_sitter_typescript::LANGUAGE_TSX.into(),
        node_types: &[
            "function_declaration",
            "class_declaration",
            "interface_declaration",
            "method_definition",
            "lexical_declaration",
            "export_statement",
        ],
        container_types: &["class_declaration", "interface_declaration"],
        subdivision_types: ts_subdivisions(),
        variable_types: &["lexical_declaration", "variable_declaration"],
        comment_pattern: r"(?m)/\*\*[\s\S]*?\*/|^\s*//.*$",
    }
}

fn python_rule() -> LanguageRule {
    LanguageRule {
        name: "python",
        extensions: &["py", "pyi"],
        language: || tree_sitter_python::LANGUAGE.into(),
        node_types: &["function_definition", "class_definition", "decorated_definition"],
        container_types: &["class_definition"],
        subdivision_types: python_subdivisions(),
        variable_types: &["assignment"],
        comment_pattern: r#"(?m)"""[\s\S]*?"""|'''[\s\S]*?'''|^\s*#.*$"#,
    }
}

#[cfg(feature = "lang-go")]
fn go_rule() -> LanguageRule {
    LanguageRule {
        name: "go",
        extensions: &["go"],
        language: || tree_sitter_go::LANGUAGE.into(),
        node_types: &["function_declaration", "method_declaration", "type_declaration"],
        container_types: &[],
        subdivision_types: go_subdivisions(),
        variable_types: &["var_declaration", "const_declaration"],
        comment_pattern: r"(?m)^\s*//.*$",
    }
}

#[cfg(feature = "lang-java")]
fn java_rule() -> LanguageRule {
    LanguageRule {
        name: "java",
        extensions: &["java"],
        language: || tree_sitter_java::LANGUAGE.into(),
        node_types: &["class_declaration", "interface_declaration", "method_declaration", "enum_declaration"],
        container_types: &["class_declaration", "interface_declaration"],
        subdivision_types: java_subdivisions(),
        variable_types: &["field_declaration", "local_variable_declaration"],
        comment_pattern: r"(?m)/\*\*[\s\S]*?\*/|^\s*//.*$",
    }
}

#[cfg(feature = "lang-csharp")]
fn csharp_rule() -> LanguageRule {
    LanguageRule {
        name: "csharp",
        extensions: &["cs"],
        language: || tree_sitter_c_sharp::LANGUAGE.into(),
        node_types: &["class_declaration", "interface_declaration", "method_declaration", "struct_declaration"],
        container_types: &["class_declaration", "interface_declaration"],
        subdivision_types: csharp_subdivisions(),
        variable_types: &["field_declaration"],
        comment_pattern: r"(?m)///.*$|/\*\*[\s\S]*?\*/",
    }
}

#[cfg(feature = "lang-php")]
fn php_rule() -> LanguageRule {
    LanguageRule {
        name: "php",
        extensions: &["php"],
        language: || tree_sitter_php::LANGUAGE_PHP.into(),
        node_types: &["class_declaration", "interface_declaration", "function_definition", "method_declaration"],
        container_types: &["class_declaration", "interface_declaration"],
        subdivision_types: php_subdivisions(),
        variable_types: &["property_declaration"],
        comment_pattern: r"(?m)/\*\*[\s\S]*?\*/|^\s*//.*$|^\s*#.*$",
    }
}

pub struct RuleRegistry {
    rules: Vec<LanguageRule>,
    by_ext: HashMap<&'static str, usize>,
}

impl RuleRegistry {
    fn new() -> Self {
        let mut rules = vec![rust_rule(), typescript_rule(), python_rule()];
        #[cfg(feature = "lang-go")]
        rules.push(go_rule());
        #[cfg(feature = "lang-java")]
        rules.push(java_rule());
        #[cfg(feature = "lang-csharp")]
        rules.push(csharp_rule());
        #[cfg(feature = "lang-php")]
        rules.push(php_rule());

        let mut by_ext = HashMap::new();
        for (idx, rule) in rules.iter().enumerate() {
            for ext in rule.extensions {
                by_ext.insert(*ext, idx);
            }
        }
        Self { rules, by_ext }
    }

    pub fn for_extension(&self, ext: &str) -> Option<&LanguageRule> {
        let lower: String = ext.to_ascii_lowercase();
        self.by_ext.get(lower.as_str()).map(|idx| &self.rules[*idx])
    }

    pub fn for_path(&self, path: &std::path::Path) -> Option<&LanguageRule> {
        let ext = path.extension()?.to_str()?;
        self.for_extension(ext)
    }
}

static REGISTRY: OnceLock<RuleRegistry> = OnceLock::new();

pub fn registry() -> &'static RuleRegistry {
    REGISTRY.get_or_init(RuleRegistry::new)
}

/// Doc-comment regex compilation is cached per rule name since `Regex::new`
/// is comparatively expensive and the chunker calls this once per node.
static COMMENT_REGEXES: OnceLock<HashMap<&'static str, Regex>> = OnceLock::new();

pub fn comment_regex(rule: &LanguageRule) -> &'static Regex {
    let map = COMMENT_REGEXES.get_or_init(|| {
        let mut m = HashMap::new();
        for r in &registry().rules {
            if let Ok(re) = Regex::new(r.comment_pattern) {
                m.insert(r.name, re);
            }
        }
        m
    });
    map.get(rule.name).expect("comment pattern compiled at registry init")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_rust_by_extension() {
        let rule = registry().for_extension("rs").unwrap();
        assert_eq!(rule.name, "rust");
        assert!(rule.is_chunkable("function_item"));
        assert!(!rule.is_chunkable("use_declaration"));
    }

    #[test]
    fn unknown_extension_has_no_rule() {
        assert!(registry().for_extension("xyz123").is_none());
    }

    #[test]
    fn subdivisions_resolve_for_impl_blocks() {
        let rule = registry().for_extension("rs").unwrap();
        let subs = rule.subdivisions_for("impl_item").unwrap();
        assert!(subs.contains(&"function_item"));
    }
}
