//! Helpers for extracting values from KDL nodes.

use kdl::KdlNode;
use std::collections::HashMap;

pub(crate) fn first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

pub(crate) fn string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

/// Positional argument count, whatever the value types.
pub(crate) fn arg_count(node: &KdlNode) -> usize {
    node.entries().iter().filter(|e| e.name().is_none()).count()
}

pub(crate) fn first_integer_arg(node: &KdlNode) -> Option<i128> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
        .map(i128::from)
}

/// Collect a list-valued property. Accepts repeated properties
/// (`types="a" types="b"`) or a child node (`types "a" "b"`).
pub(crate) fn string_list_prop(node: &KdlNode, name: &str) -> Vec<String> {
    let from_props: Vec<String> = node
        .entries()
        .iter()
        .filter(|e| e.name().map(|n| n.value() == name).unwrap_or(false))
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect();

    if !from_props.is_empty() {
        return from_props;
    }

    node.children()
        .and_then(|children| children.nodes().iter().find(|c| c.name().value() == name))
        .map(string_args)
        .unwrap_or_default()
}

/// Read an `env { KEY "value" }` block.
pub(crate) fn string_map(node: &KdlNode) -> HashMap<String, String> {
    let mut map = HashMap::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            if let Some(value) = first_string_arg(child) {
                map.insert(child.name().value().to_string(), value);
            }
        }
    }
    map
}
