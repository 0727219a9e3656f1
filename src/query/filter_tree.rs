//! Shared-prefix trie over resolver attribute lists.
//!
//! Resolvers in one weight tier often overlap: `["name", "dob"]` and
//! `["name", "phone"]` both start with `name`. Inserting the ordered lists
//! into a trie collapses the shared prefix, so the generated query tests
//! `name` once and branches into `dob` or `phone` beneath it instead of
//! repeating the `name` clause per resolver.

use serde_json::json;
use std::collections::BTreeMap;

use crate::attribute::Attribute;
use crate::error::ValidationError;
use crate::query::clause::{build_attribute_clause, combine, ClauseContext, Combiner, TagSequence};

/// Trie node. Each edge is an attribute name; a path from the root spells
/// one resolver's ordered attribute list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterTree {
    children: BTreeMap<String, FilterTree>,
}

impl FilterTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a tree from ordered attribute lists, one per resolver.
    #[must_use]
    pub fn from_lists<I, L>(lists: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: AsRef<[String]>,
    {
        let mut tree = Self::new();
        for list in lists {
            tree.insert_path(list.as_ref());
        }
        tree
    }

    /// Inserts one ordered attribute list as a root-to-leaf path.
    pub fn insert_path(&mut self, path: &[String]) {
        let mut node = self;
        for attribute in path {
            node = node.children.entry(attribute.clone()).or_default();
        }
    }

    /// True when the tree has no branches.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Child branches in attribute name order.
    #[must_use]
    pub fn children(&self) -> &BTreeMap<String, FilterTree> {
        &self.children
    }
}

/// Renders the tree as one boolean clause.
///
/// Each branch contributes the attribute's match clause AND'd with the
/// rendered subtree; sibling branches are OR'd. A leaf contributes the
/// attribute clause alone. Branches whose attribute has no queryable
/// field in this collection are dropped.
pub fn resolvers_clause(
    ctx: &ClauseContext<'_>,
    attributes: &BTreeMap<String, Attribute>,
    tree: &FilterTree,
    sequence: &mut TagSequence,
) -> Result<Option<serde_json::Value>, ValidationError> {
    let mut branches = Vec::new();
    for (attribute, subtree) in tree.children() {
        let Some(attribute_clause) =
            build_attribute_clause(ctx, attributes, attribute, Combiner::Should, sequence)?
        else {
            continue;
        };
        let branch = match resolvers_clause(ctx, attributes, subtree, sequence)? {
            Some(descendants) => json!({
                "bool": {
                    "filter": [attribute_clause, descendants]
                }
            }),
            None => attribute_clause,
        };
        branches.push(branch);
    }
    Ok(combine(branches, Combiner::Should))
}
