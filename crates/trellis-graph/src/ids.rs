//! Node id conventions
//!
//! Generated ids carry a readable prefix followed by an 8 character suffix
//! drawn from an alphabet without vowels or look-alike characters.

const ALPHABET: &[u8] = b"6789BCDFGHJKLMNPQRTWbcdfghjkmnpqrtwz";
const SUFFIX_LEN: usize = 8;

/// Prefix of placeholder ("fake") nodes
pub const PLACEHOLDER_PREFIX: &str = "fake_node_";
/// Prefix of sub-workflows that own an embedded child tree
pub const NESTED_SUB_WORKFLOW_PREFIX: &str = "sub_workflow_nested_";
/// Prefix of referenced sub-workflow names
pub const SUB_WORKFLOW_PREFIX: &str = "sub_workflow_";
/// Legacy prefix rewritten to `SUB_WORKFLOW_PREFIX` during normalization
pub const LEGACY_SUB_WORKFLOW_PREFIX: &str = "sub_workflow:";
/// Prefix of loop output collectors
pub const COLLECTOR_PREFIX: &str = "collect_loop_output_";
/// Prefix of JOIN tasks spawned for a fork
pub const JOIN_PREFIX: &str = "join_";

/// Generate a random id suffix
pub fn nano_id() -> String {
    uuid::Uuid::new_v4()
        .as_bytes()
        .iter()
        .take(SUFFIX_LEN)
        .map(|b| ALPHABET[*b as usize % ALPHABET.len()] as char)
        .collect()
}

/// Generate an id with the given prefix
pub fn prefixed(prefix: &str) -> String {
    format!("{}{}", prefix, nano_id())
}

pub fn is_placeholder(id: &str) -> bool {
    id.starts_with(PLACEHOLDER_PREFIX)
}

pub fn is_nested_sub_workflow(id: &str) -> bool {
    id.starts_with(NESTED_SUB_WORKFLOW_PREFIX)
}

/// Rewrite the legacy `sub_workflow:` prefix
pub fn normalize_sub_workflow_name(name: &str) -> String {
    match name.strip_prefix(LEGACY_SUB_WORKFLOW_PREFIX) {
        Some(rest) => format!("{}{}", SUB_WORKFLOW_PREFIX, rest),
        None => name.to_string(),
    }
}
