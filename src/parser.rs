//! Whole-file AST parsing. Parse failures are never fatal —
//! callers fall back to the statement-window/line chunker.

use tree_sitter::{Parser, Tree};

use crate::rules::LanguageRule;

/// Streaming-parse threshold. Tree-sitter's own
/// incremental API already handles large buffers well; we parse whole-file
/// regardless since none of the grammars here expose a chunked-read input
/// callback worth the complexity at this scale.
pub const STREAM_THRESHOLD_BYTES: usize = 30 * 1024;

pub fn parse(rule: &LanguageRule, source: &str) -> Option<Tree> {
    let mut parser = Parser::new();
    parser.set_language(&(rule.language)()).ok()?;
    parser.parse(source, None)
}
