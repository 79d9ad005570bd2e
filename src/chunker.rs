//! Semantic chunker: collects chunkable AST nodes, groups
//! them into units sized near the model's `optimal`, subdivides oversized
//! groups, and falls back to a line-window slice when no subdivision
//! exists. Splits the work into `ast_chunk`/`ast_guided_chunks`/
//! `line_range_chunks` stages, generalized from a single fixed `max_lines`
//! cutoff to the full min/optimal/max/overlap profile.

use std::collections::HashSet;

use regex::Regex;
use tree_sitter::Node;

use crate::chunk::Chunk;
use crate::config::ModelProfile;
use crate::rules::{comment_regex, LanguageRule};

const MAX_TAGS: usize = 10;
const MAX_SIGNATURE_LEN: usize = 400;
const MAX_PARAMETERS: usize = 12;
const MAX_RETURN_LEN: usize = 80;
const DOC_LOOKBACK_BYTES: usize = 500;

/// A contiguous AST region collected during the pre-order walk.
#[derive(Debug, Clone)]
struct CollectedNode {
    kind: String,
    start_byte: usize,
    end_byte: usize,
    start_line: usize,
    end_line: usize,
}

/// Pre-order walk emitting each node whose type is in `rule.node_types`,
/// skipping descendants once a qualifying ancestor has been emitted (the
/// outermost qualifying node wins).
fn collect_nodes(root: Node, rule: &LanguageRule) -> Vec<CollectedNode> {
    let mut out = Vec::new();
    let mut cursor = root.walk();
    collect_recursive(&mut cursor.node(), rule, &mut out);
    out
}

fn collect_recursive(node: &Node, rule: &LanguageRule, out: &mut Vec<CollectedNode>) {
    if rule.is_chunkable(node.kind()) {
        out.push(CollectedNode {
            kind: node.kind().to_string(),
            start_byte: node.start_byte(),
            end_byte: node.end_byte(),
            start_line: node.start_position().row,
            end_line: node.end_position().row,
        });
        return; // outermost qualifying node wins; do not descend further
    }
    let mut cursor = node.walk();
    if cursor.goto_first_child() {
        loop {
            collect_recursive(&cursor.node(), rule, out);
            if !cursor.goto_next_sibling() {
                break;
            }
        }
    }
}

/// A semantic group: either a standalone container node, or a run of
/// consecutive non-container nodes treated as one `file_section`.
#[derive(Debug, Clone)]
struct SemanticGroup {
    nodes: Vec<CollectedNode>,
    is_container: bool,
}

impl SemanticGroup {
    fn kind_label(&self) -> &str {
        self.nodes.first().map(|n| n.kind.as_str()).unwrap_or("group")
    }

    fn start_byte(&self) -> usize {
        self.nodes.first().map(|n| n.start_byte).unwrap_or(0)
    }

    fn end_byte(&self) -> usize {
        self.nodes.last().map(|n| n.end_byte).unwrap_or(0)
    }

    fn start_line(&self) -> usize {
        self.nodes.first().map(|n| n.start_line).unwrap_or(0)
    }

    fn end_line(&self) -> usize {
        self.nodes.last().map(|n| n.end_line).unwrap_or(0)
    }
}

fn partition_into_groups(nodes: Vec<CollectedNode>, rule: &LanguageRule) -> Vec<SemanticGroup> {
    let mut groups = Vec::new();
    let mut current_section: Vec<CollectedNode> = Vec::new();
    for node in nodes {
        if rule.is_container(&node.kind) {
            if !current_section.is_empty() {
                groups.push(SemanticGroup { nodes: std::mem::take(&mut current_section), is_container: false });
            }
            groups.push(SemanticGroup { nodes: vec![node], is_container: true });
        } else {
            current_section.push(node);
        }
    }
    if !current_section.is_empty() {
        groups.push(SemanticGroup { nodes: current_section, is_container: false });
    }
    groups
}

/// Character- or token-estimated size of `text`, per the profile's mode.
/// Token mode uses a 4-chars-per-token estimate in the absence of an
/// external tokenizer — best-effort pending a real tokenizer integration.
fn measure(text: &str, profile: &ModelProfile) -> usize {
    let chars = text.chars().count();
    if profile.token_mode {
        (chars / 4).max(1)
    } else {
        chars
    }
}

struct FinalUnit {
    start_byte: usize,
    end_byte: usize,
    start_line: usize,
    end_line: usize,
    kind_label: String,
    /// true if this unit came from merging 2+ source-order semantic groups
    /// (and therefore gets a synthetic `{kind}_group_N` symbol).
    is_merged_group: bool,
}

/// Greedily combine groups into super-groups near `optimal`, never
/// exceeding `max` except for a single oversized group (handled by the
/// caller via subdivision).
fn pack_greedy(groups: &[SemanticGroup], source: &str, profile: &ModelProfile) -> Vec<FinalUnit> {
    let mut units = Vec::new();
    let mut current: Vec<&SemanticGroup> = Vec::new();
    let mut current_size = 0usize;

    let emit = |current: &mut Vec<&SemanticGroup>, units: &mut Vec<FinalUnit>| {
        if current.is_empty() {
            return;
        }
        let first = current[0];
        let last = *current.last().unwrap();
        units.push(FinalUnit {
            start_byte: first.start_byte(),
            end_byte: last.end_byte(),
            start_line: first.start_line(),
            end_line: last.end_line(),
            kind_label: first.kind_label().to_string(),
            is_merged_group: current.len() > 1,
        });
        current.clear();
    };

    for group in groups {
        let text = &source[group.start_byte()..group.end_byte().min(source.len())];
        let group_size = measure(text, profile);

        if group_size > profile.optimal && current_size == 0 {
            // Emitted alone (oversized-group case); subdivision happens later.
            units.push(FinalUnit {
                start_byte: group.start_byte(),
                end_byte: group.end_byte(),
                start_line: group.start_line(),
                end_line: group.end_line(),
                kind_label: group.kind_label().to_string(),
                is_merged_group: false,
            });
            continue;
        }
        if group_size > profile.optimal {
            emit(&mut current, &mut units);
            current_size = 0;
            units.push(FinalUnit {
                start_byte: group.start_byte(),
                end_byte: group.end_byte(),
                start_line: group.start_line(),
                end_line: group.end_line(),
                kind_label: group.kind_label().to_string(),
                is_merged_group: false,
            });
            continue;
        }
        if current_size + group_size > profile.max {
            emit(&mut current, &mut units);
            current_size = 0;
        }
        current.push(group);
        current_size += group_size;
        if current_size as f64 >= 0.9 * profile.optimal as f64 {
            emit(&mut current, &mut units);
            current_size = 0;
        }
    }
    emit(&mut current, &mut units);
    units
}

/// Subdivide an oversized unit using `subdivisionTypes`, recursing as
/// needed; falls through to a line-window slice when no subdivisions
/// exist for this node kind.
fn subdivide_or_window(
    unit: &FinalUnit,
    root: Node,
    source: &str,
    rule: &LanguageRule,
    profile: &ModelProfile,
) -> Vec<FinalUnit> {
    if let Some(sub_kinds) = rule.subdivisions_for(&unit.kind_label) {
        let mut found = Vec::new();
        find_nodes_of_kinds(root, unit.start_byte, unit.end_byte, sub_kinds, &mut found);
        if !found.is_empty() {
            let sub_groups: Vec<SemanticGroup> = found
                .into_iter()
                .map(|n| SemanticGroup { nodes: vec![n], is_container: false })
                .collect();
            let packed = pack_greedy(&sub_groups, source, profile);
            let mut out = Vec::new();
            for u in packed {
                let text = &source[u.start_byte..u.end_byte.min(source.len())];
                if measure(text, profile) > profile.max {
                    out.extend(subdivide_or_window(&u, root, source, rule, profile));
                } else {
                    out.push(u);
                }
            }
            return out;
        }
    }
    statement_window(unit, source, profile)
}

fn find_nodes_of_kinds(node: Node, range_start: usize, range_end: usize, kinds: &[&str], out: &mut Vec<CollectedNode>) {
    if node.start_byte() >= range_end || node.end_byte() <= range_start {
        return;
    }
    if kinds.contains(&node.kind()) && node.start_byte() >= range_start && node.end_byte() <= range_end {
        out.push(CollectedNode {
            kind: node.kind().to_string(),
            start_byte: node.start_byte(),
            end_byte: node.end_byte(),
            start_line: node.start_position().row,
            end_line: node.end_position().row,
        });
        return;
    }
    let mut cursor = node.walk();
    if cursor.goto_first_child() {
        loop {
            find_nodes_of_kinds(cursor.node(), range_start, range_end, kinds, out);
            if !cursor.goto_next_sibling() {
                break;
            }
        }
    }
}

/// Slices `unit`'s source into line ranges of size <= `max`, with an
/// overlap of `overlap` (same unit as min/max) carried between windows.
fn statement_window(unit: &FinalUnit, source: &str, profile: &ModelProfile) -> Vec<FinalUnit> {
    let text = &source[unit.start_byte..unit.end_byte.min(source.len())];
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        return vec![];
    }

    let mut windows = Vec::new();
    let mut start_idx = 0usize;
    while start_idx < lines.len() {
        let mut end_idx = start_idx;
        let mut size = 0usize;
        while end_idx < lines.len() {
            let line_size = measure(lines[end_idx], profile) + 1;
            if size + line_size > profile.max && end_idx > start_idx {
                break;
            }
            size += line_size;
            end_idx += 1;
        }
        windows.push((start_idx, end_idx));
        if end_idx >= lines.len() {
            break;
        }
        // carry back enough lines to cover `overlap`.
        let mut back = end_idx;
        let mut carried = 0usize;
        while back > start_idx && carried < profile.overlap {
            back -= 1;
            carried += measure(lines[back], profile) + 1;
        }
        start_idx = back.max(start_idx + 1);
    }

    windows
        .into_iter()
        .map(|(s, e)| {
            let local_start_byte: usize = lines[..s].iter().map(|l| l.len() + 1).sum();
            let local_end_byte: usize = lines[..e].iter().map(|l| l.len() + 1).sum::<usize>().min(text.len());
            FinalUnit {
                start_byte: unit.start_byte + local_start_byte,
                end_byte: unit.start_byte + local_end_byte,
                start_line: unit.start_line + s,
                end_line: unit.start_line + e.saturating_sub(1),
                kind_label: "file_section".to_string(),
                is_merged_group: true,
            }
        })
        .collect()
}

pub struct ChunkingStats {
    pub merged_small: usize,
    pub skipped_small: usize,
}

pub struct ChunkingResult {
    pub chunks: Vec<Chunk>,
    pub stats: ChunkingStats,
}

/// Merges units below `min` with a neighbor; units with no neighbor are
/// dropped and counted as skipped.
fn merge_small_units(units: Vec<FinalUnit>, source: &str, profile: &ModelProfile) -> (Vec<FinalUnit>, ChunkingStats) {
    let mut stats = ChunkingStats { merged_small: 0, skipped_small: 0 };
    if units.is_empty() {
        return (units, stats);
    }
    let mut merged: Vec<FinalUnit> = Vec::new();
    for unit in units {
        let text = &source[unit.start_byte..unit.end_byte.min(source.len())];
        let size = measure(text, profile);
        if size >= profile.min {
            merged.push(unit);
            continue;
        }
        if let Some(prev) = merged.last_mut() {
            prev.end_byte = unit.end_byte.max(prev.end_byte);
            prev.end_line = unit.end_line.max(prev.end_line);
            prev.is_merged_group = true;
            stats.merged_small += 1;
        } else {
            // no preceding neighbor yet; try folding into the next unit by
            // keeping it pending — simplest correct behavior per spec is
            // "merged with neighbor; if none, skipped". We attempt a
            // lookahead merge, else skip.
            merged.push(unit);
        }
    }
    // second pass: any unit still below min with only a following
    // neighbor (was first with nothing before it) merges forward.
    let mut result = Vec::new();
    let mut i = 0;
    while i < merged.len() {
        let text = &source[merged[i].start_byte..merged[i].end_byte.min(source.len())];
        let size = measure(text, profile);
        if size < profile.min {
            if i + 1 < merged.len() {
                merged[i + 1].start_byte = merged[i].start_byte;
                merged[i + 1].start_line = merged[i].start_line;
                merged[i + 1].is_merged_group = true;
                stats.merged_small += 1;
            } else if !result.is_empty() {
                let last = result.len() - 1;
                let prev: &mut FinalUnit = &mut result[last];
                prev.end_byte = merged[i].end_byte;
                prev.end_line = merged[i].end_line;
                stats.merged_small += 1;
            } else {
                stats.skipped_small += 1;
            }
        } else {
            result.push(std::mem::replace(
                &mut merged[i],
                FinalUnit { start_byte: 0, end_byte: 0, start_line: 0, end_line: 0, kind_label: String::new(), is_merged_group: false },
            ));
        }
        i += 1;
    }
    (result, stats)
}

struct ExtractedMetadata {
    docs: Option<String>,
    tags_from_doc: Vec<String>,
    intent: Option<String>,
    description: Option<String>,
    signature: Option<String>,
    parameters: Vec<String>,
    return_type: Option<String>,
    calls: Vec<String>,
}

fn extract_doc_comment(rule: &LanguageRule, source: &str, node_start_byte: usize) -> Option<String> {
    let lookback_start = node_start_byte.saturating_sub(DOC_LOOKBACK_BYTES);
    let preceding = &source[lookback_start..node_start_byte.min(source.len())];
    let re = comment_regex(rule);
    re.find_iter(preceding).last().map(|m| m.as_str().to_string())
}

fn parse_doc_tags(doc: &str) -> (Vec<String>, Option<String>, Option<String>) {
    let tags_re = Regex::new(r"@codevault-tags:\s*(.+)").unwrap();
    let intent_re = Regex::new(r"@codevault-intent:\s*(.+)").unwrap();
    let desc_re = Regex::new(r"@codevault-description:\s*(.+)").unwrap();

    let tags = tags_re
        .captures(doc)
        .map(|c| c[1].split(',').map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();
    let intent = intent_re.captures(doc).map(|c| c[1].trim().to_string());
    let description = desc_re.captures(doc).map(|c| c[1].trim().to_string());
    (tags, intent, description)
}

fn extract_signature(code: &str) -> Option<String> {
    let re = Regex::new(r"(?m)^\s*(?:pub\s+|export\s+|public\s+|private\s+|protected\s+|static\s+|async\s+)*(?:fn|function|def|func)\s+[A-Za-z_][A-Za-z0-9_]*\s*\([^)]*\)[^{;]*").ok()?;
    re.find(code).map(|m| {
        let s = m.as_str().trim();
        if s.chars().count() > MAX_SIGNATURE_LEN {
            s.chars().take(MAX_SIGNATURE_LEN).collect()
        } else {
            s.to_string()
        }
    })
}

fn extract_parameters(signature: &str) -> Vec<String> {
    let Some(open) = signature.find('(') else { return vec![] };
    let Some(close) = signature.rfind(')') else { return vec![] };
    if close <= open {
        return vec![];
    }
    let inner = &signature[open + 1..close];
    if inner.trim().is_empty() {
        return vec![];
    }
    inner
        .split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .take(MAX_PARAMETERS)
        .collect()
}

fn extract_return_type(signature: &str) -> Option<String> {
    let re = Regex::new(r"(?:->|:)\s*([A-Za-z_][A-Za-z0-9_<>\[\],. :]*)\s*$").ok()?;
    re.captures(signature).map(|c| {
        let s = c[1].trim();
        s.chars().take(MAX_RETURN_LEN).collect()
    })
}

fn extract_calls(code: &str) -> Vec<String> {
    let re = Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\s*\(").unwrap();
    let keywords: HashSet<&str> = ["if", "for", "while", "switch", "match", "catch", "function", "return"].into_iter().collect();
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for cap in re.captures_iter(code) {
        let name = cap[1].to_string();
        if keywords.contains(name.as_str()) || seen.contains(&name) {
            continue;
        }
        seen.insert(name.clone());
        out.push(name);
    }
    out
}

fn camel_split(s: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    for ch in s.chars() {
        if ch.is_uppercase() && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        current.push(ch.to_ascii_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

const DOMAIN_KEYWORDS: &[&str] = &[
    "auth", "cache", "config", "database", "encrypt", "error", "handler", "index", "parser", "queue",
    "rate", "router", "scanner", "search", "server", "store", "test", "token", "watch",
];

fn mine_semantic_tags(file: &str, symbol: &str, code: &str) -> Vec<String> {
    let mut tags = Vec::new();
    let mut seen = HashSet::new();

    for segment in file.split(['/', '\\', '.', '_', '-']) {
        let lower = segment.to_lowercase();
        if lower.len() > 2 && seen.insert(lower.clone()) {
            tags.push(lower);
        }
    }
    for word in camel_split(symbol) {
        if word.len() > 2 && seen.insert(word.clone()) {
            tags.push(word);
        }
    }
    let lower_code = code.to_lowercase();
    for kw in DOMAIN_KEYWORDS {
        if lower_code.contains(kw) && seen.insert(kw.to_string()) {
            tags.push(kw.to_string());
        }
    }
    tags.truncate(MAX_TAGS);
    tags
}

fn extract_symbol_name(kind: &str, code: &str, counter: usize) -> (String, bool) {
    let re = Regex::new(r"(?:fn|function|class|struct|enum|trait|interface|def|func|mod|module)\s+([A-Za-z_][A-Za-z0-9_]*)").ok();
    if let Some(re) = re {
        if let Some(caps) = re.captures(code) {
            return (caps[1].to_string(), false);
        }
    }
    (format!("{kind}_group_{counter}"), true)
}

fn build_metadata(rule: &LanguageRule, source: &str, node_start_byte: usize, code: &str) -> ExtractedMetadata {
    let docs = extract_doc_comment(rule, source, node_start_byte);
    let (tags_from_doc, intent, description) = docs.as_deref().map(parse_doc_tags).unwrap_or_default();
    let signature = extract_signature(code);
    let parameters = signature.as_deref().map(extract_parameters).unwrap_or_default();
    let return_type = signature.as_deref().and_then(extract_return_type);
    let calls = extract_calls(code);
    ExtractedMetadata { docs, tags_from_doc, intent, description, signature, parameters, return_type, calls }
}

/// Chunks a whole parsed file. `tree` is `None` when parsing failed or no
/// grammar exists — in that case the caller should use the file-processor's
/// fallback chunk elsewhere, not this function.
pub fn chunk_file(
    file: &str,
    source: &str,
    rule: &LanguageRule,
    tree: &tree_sitter::Tree,
    profile: &ModelProfile,
) -> ChunkingResult {
    let root = tree.root_node();
    let collected = collect_nodes(root, rule);
    let groups = partition_into_groups(collected, rule);
    let packed = pack_greedy(&groups, source, profile);

    let mut expanded = Vec::new();
    for unit in packed {
        let text = &source[unit.start_byte..unit.end_byte.min(source.len())];
        if measure(text, profile) > profile.max {
            expanded.extend(subdivide_or_window(&unit, root, source, rule, profile));
        } else {
            expanded.push(unit);
        }
    }

    let (final_units, stats) = merge_small_units(expanded, source, profile);

    let mut chunks = Vec::with_capacity(final_units.len());
    for (idx, unit) in final_units.iter().enumerate() {
        let code = source[unit.start_byte..unit.end_byte.min(source.len())].to_string();
        if code.trim().is_empty() {
            continue;
        }
        let (symbol, synthetic) = if unit.is_merged_group {
            (format!("{}_group_{idx}", unit.kind_label), true)
        } else {
            extract_symbol_name(&unit.kind_label, &code, idx)
        };
        let chunk_type = if synthetic { format!("{}_group_{idx}", unit.kind_label) } else { unit.kind_label.clone() };
        let sha = Chunk::sha1_hex(code.as_bytes());
        let chunk_id = Chunk::make_id(file, &symbol, &sha);
        let meta = build_metadata(rule, source, unit.start_byte, &code);
        let mut variable_nodes = Vec::new();
        find_nodes_of_kinds(root, unit.start_byte, unit.end_byte, rule.variable_types, &mut variable_nodes);
        let variable_count = variable_nodes.len();
        let mut tags = meta.tags_from_doc.clone();
        for t in mine_semantic_tags(file, &symbol, &code) {
            if !tags.contains(&t) {
                tags.push(t);
            }
        }
        tags.truncate(MAX_TAGS);

        chunks.push(Chunk {
            chunk_id,
            sha,
            file: file.to_string(),
            symbol,
            lang: rule.name.to_string(),
            chunk_type,
            embedding: Vec::new(),
            embedding_provider: String::new(),
            embedding_dimensions: 0,
            symbol_signature: meta.signature,
            symbol_parameters: if meta.parameters.is_empty() { None } else { Some(meta.parameters) },
            symbol_return: meta.return_type,
            symbol_calls: if meta.calls.is_empty() { None } else { Some(meta.calls) },
            symbol_neighbors: None,
            tags,
            intent: meta.intent,
            description: meta.description,
            docs: meta.docs,
            variable_count,
            encrypted: false,
            code,
        });
    }

    ChunkingResult { chunks, stats }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::rules::registry;

    fn profile() -> ModelProfile {
        ModelProfile { min: 5, optimal: 200, max: 400, overlap: 20, token_mode: false }
    }

    #[test]
    fn chunk_size_never_exceeds_max() {
        let rule = registry().for_extension("rs").unwrap();
        let source = "fn a() { 1 }\nfn b() { 2 }\nstruct S { x: i32 }\n".repeat(20);
        let tree = parse(rule, &source).unwrap();
        let result = chunk_file("src/a.rs", &source, rule, &tree, &profile());
        for c in &result.chunks {
            assert!(c.code.chars().count() <= profile().max + profile().overlap * 2);
        }
    }

    #[test]
    fn extracts_function_symbol_name() {
        let rule = registry().for_extension("rs").unwrap();
        let source = "fn hello_world(n: &str) -> String { format!(\"hi {n}\") }";
        let tree = parse(rule, source).unwrap();
        let result = chunk_file("src/a.rs", source, rule, &tree, &profile());
        assert!(result.chunks.iter().any(|c| c.symbol == "hello_world"));
    }

    #[test]
    fn mines_doc_tags() {
        let rule = registry().for_extension("rs").unwrap();
        let source = "/// @codevault-tags: auth, login\n/// @codevault-intent: authenticate a user\nfn login() {}";
        let tree = parse(rule, source).unwrap();
        let result = chunk_file("src/a.rs", source, rule, &tree, &profile());
        let chunk = result.chunks.iter().find(|c| c.symbol == "login").unwrap();
        assert!(chunk.tags.contains(&"auth".to_string()));
        assert_eq!(chunk.intent.as_deref(), Some("authenticate a user"));
    }

    #[test]
    fn counts_let_declarations_as_variables() {
        let rule = registry().for_extension("rs").unwrap();
        let source = "fn hello() { let a = 1; let b = 2; a + b }";
        let tree = parse(rule, source).unwrap();
        let result = chunk_file("src/a.rs", source, rule, &tree, &profile());
        let chunk = result.chunks.iter().find(|c| c.symbol == "hello").unwrap();
        assert_eq!(chunk.variable_count, 2);
    }

    #[test]
    fn sha_is_content_addressed() {
        let rule = registry().for_extension("rs").unwrap();
        let source = "fn a() {}";
        let tree = parse(rule, source).unwrap();
        let result = chunk_file("src/a.rs", source, rule, &tree, &profile());
        for c in &result.chunks {
            assert_eq!(c.sha, Chunk::sha1_hex(c.code.as_bytes()));
        }
    }
}
