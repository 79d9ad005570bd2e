//! Symbol graph: after all chunks are in the codemap,
//! build a per-chunk `symbol_neighbors` list by resolving each entry in
//! `symbol_calls` to a codemap chunk with a matching `symbol`, scoped
//! preferentially to the same file, then package (directory), then
//! project. Stored as chunk IDs — never direct references.

use std::collections::HashMap;

use crate::codemap::Codemap;

pub const MAX_NEIGHBORS: usize = 16;

fn package_of(file: &str) -> &str {
    file.rfind('/').map(|i| &file[..i]).unwrap_or("")
}

/// Builds `symbol -> [chunk_id]` lookup tables scoped by file and package,
/// then resolves each chunk's `symbol_calls` against them.
pub fn build_symbol_neighbors(codemap: &Codemap) -> HashMap<String, Vec<String>> {
    let mut by_file: HashMap<&str, HashMap<&str, Vec<&str>>> = HashMap::new();
    let mut by_package: HashMap<&str, HashMap<&str, Vec<&str>>> = HashMap::new();
    let mut by_project: HashMap<&str, Vec<&str>> = HashMap::new();

    for (id, entry) in codemap.all() {
        by_file.entry(entry.file.as_str()).or_default().entry(entry.symbol.as_str()).or_default().push(id.as_str());
        by_package
            .entry(package_of(&entry.file))
            .or_default()
            .entry(entry.symbol.as_str())
            .or_default()
            .push(id.as_str());
        by_project.entry(entry.symbol.as_str()).or_default().push(id.as_str());
    }

    let mut result = HashMap::new();
    for (id, entry) in codemap.all() {
        let Some(calls) = &entry.symbol_calls else { continue };
        let mut neighbors: Vec<String> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        seen.insert(id.clone());

        for call in calls {
            if neighbors.len() >= MAX_NEIGHBORS {
                break;
            }
            let candidates = by_file
                .get(entry.file.as_str())
                .and_then(|m| m.get(call.as_str()))
                .or_else(|| by_package.get(package_of(&entry.file)).and_then(|m| m.get(call.as_str())))
                .or_else(|| by_project.get(call.as_str()));

            if let Some(ids) = candidates {
                for cand in ids {
                    if neighbors.len() >= MAX_NEIGHBORS {
                        break;
                    }
                    if seen.insert(cand.to_string()) {
                        neighbors.push(cand.to_string());
                    }
                }
            }
        }
        if !neighbors.is_empty() {
            result.insert(id.clone(), neighbors);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;

    fn chunk(id: &str, file: &str, symbol: &str, calls: Vec<&str>) -> Chunk {
        Chunk {
            chunk_id: id.into(),
            sha: "s".into(),
            file: file.into(),
            symbol: symbol.into(),
            lang: "rust".into(),
            chunk_type: "function_item".into(),
            embedding: vec![],
            embedding_provider: "mock".into(),
            embedding_dimensions: 0,
            symbol_signature: None,
            symbol_parameters: None,
            symbol_return: None,
            symbol_calls: Some(calls.into_iter().map(String::from).collect()),
            symbol_neighbors: None,
            tags: vec![],
            intent: None,
            description: None,
            docs: None,
            variable_count: 0,
            encrypted: false,
            code: String::new(),
        }
    }

    #[test]
    fn resolves_same_file_calls_first() {
        let mut map = Codemap::default();
        map.insert_from_chunk(&chunk("a", "src/a.rs", "caller", vec!["callee"]));
        map.insert_from_chunk(&chunk("b", "src/a.rs", "callee", vec![]));
        map.insert_from_chunk(&chunk("c", "src/other.rs", "callee", vec![]));

        let neighbors = build_symbol_neighbors(&map);
        let n = neighbors.get("a").unwrap();
        assert!(n.contains(&"b".to_string()));
    }

    #[test]
    fn neighbors_capped_at_sixteen() {
        let mut map = Codemap::default();
        let calls: Vec<&str> = (0..20).map(|_| "target").collect();
        map.insert_from_chunk(&chunk("caller", "src/a.rs", "caller", calls));
        for i in 0..20 {
            map.insert_from_chunk(&chunk(&format!("t{i}"), "src/a.rs", "target", vec![]));
        }
        let neighbors = build_symbol_neighbors(&map);
        assert!(neighbors.get("caller").unwrap().len() <= MAX_NEIGHBORS);
    }
}
