//! Resolver weight tiers and attribute ordering.
//!
//! Resolvers query in tiers by descending weight. Within one tier, each
//! resolver's attributes are reordered so attributes shared by many of the
//! tier's resolvers come first. The ordering is an explicit contract, not an
//! optimization: it decides how resolvers collapse in the filter tree and
//! therefore the exact shape and tag sequence of every generated query.

use std::collections::{BTreeMap, BTreeSet};

use crate::model::EntityModel;

/// Groups resolver names by weight. Callers iterate the map in reverse to
/// process heavier tiers first.
#[must_use]
pub fn group_by_weight(model: &EntityModel, names: &[String]) -> BTreeMap<i32, Vec<String>> {
    let mut groups: BTreeMap<i32, Vec<String>> = BTreeMap::new();
    for name in names {
        if let Some(resolver) = model.resolver(name) {
            groups.entry(resolver.weight).or_default().push(name.clone());
        }
    }
    for group in groups.values_mut() {
        group.sort();
    }
    groups
}

/// Counts, per attribute, how many resolvers of the group name it.
/// A resolver naming an attribute twice still counts once.
#[must_use]
pub fn count_attribute_frequency(
    model: &EntityModel,
    group: &[String],
) -> BTreeMap<String, usize> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for name in group {
        if let Some(resolver) = model.resolver(name) {
            let distinct: BTreeSet<&String> = resolver.attributes.iter().collect();
            for attribute in distinct {
                *counts.entry(attribute.clone()).or_insert(0) += 1;
            }
        }
    }
    counts
}

/// Orders each resolver's attributes by descending group frequency, ties
/// broken by ascending name.
#[must_use]
pub fn sorted_resolver_attributes(
    model: &EntityModel,
    group: &[String],
) -> BTreeMap<String, Vec<String>> {
    let frequency = count_attribute_frequency(model, group);
    let mut sorted = BTreeMap::new();
    for name in group {
        let Some(resolver) = model.resolver(name) else {
            continue;
        };
        let mut attributes: Vec<String> = resolver
            .attributes
            .iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .cloned()
            .collect();
        attributes.sort_by(|a, b| {
            let fa = frequency.get(a).copied().unwrap_or(0);
            let fb = frequency.get(b).copied().unwrap_or(0);
            fb.cmp(&fa).then_with(|| a.cmp(b))
        });
        sorted.insert(name.clone(), attributes);
    }
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> EntityModel {
        EntityModel::from_json(
            r#"{
                "attributes": {
                    "name": {"type": "string"},
                    "dob": {"type": "date"},
                    "phone": {"type": "string"},
                    "email": {"type": "string"}
                },
                "resolvers": {
                    "name_dob": {"attributes": ["name", "dob"], "weight": 2},
                    "name_phone": {"attributes": ["name", "phone"]},
                    "name_email": {"attributes": ["email", "name"]},
                    "phone_email": {"attributes": ["phone", "email"]}
                },
                "matchers": {"exact": {"clause": {"term": {"{{ field }}": "{{ value }}"}}}},
                "indices": {"people": {"fields": {"full_name": {"attribute": "name", "matcher": "exact"}}}}
            }"#,
        )
        .unwrap()
    }

    fn names(model: &EntityModel) -> Vec<String> {
        model.resolvers.keys().cloned().collect()
    }

    #[test]
    fn groups_split_by_weight() {
        let model = model();
        let groups = group_by_weight(&model, &names(&model));
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[&2], vec!["name_dob"]);
        assert_eq!(groups[&0], vec!["name_email", "name_phone", "phone_email"]);

        let weights: Vec<i32> = groups.keys().rev().copied().collect();
        assert_eq!(weights, vec![2, 0]);
    }

    #[test]
    fn frequency_counts_resolvers_not_mentions() {
        let model = model();
        let group = vec![
            "name_phone".to_string(),
            "name_email".to_string(),
            "phone_email".to_string(),
        ];
        let counts = count_attribute_frequency(&model, &group);
        assert_eq!(counts["name"], 2);
        assert_eq!(counts["phone"], 2);
        assert_eq!(counts["email"], 2);
        assert_eq!(counts.get("dob"), None);
    }

    #[test]
    fn attributes_sort_by_frequency_then_name() {
        let model = model();
        let group = vec![
            "name_phone".to_string(),
            "name_email".to_string(),
            "phone_email".to_string(),
        ];
        let sorted = sorted_resolver_attributes(&model, &group);
        // All frequencies tie at 2, so names decide.
        assert_eq!(sorted["name_phone"], vec!["name", "phone"]);
        assert_eq!(sorted["name_email"], vec!["email", "name"]);
        assert_eq!(sorted["phone_email"], vec!["email", "phone"]);
    }

    #[test]
    fn dominant_attribute_sorts_first() {
        let model = model();
        let group = vec!["name_phone".to_string(), "name_email".to_string()];
        let sorted = sorted_resolver_attributes(&model, &group);
        // name appears in both resolvers, so it leads despite the tie-break
        // names sorting earlier.
        assert_eq!(sorted["name_email"], vec!["name", "email"]);
        assert_eq!(sorted["name_phone"], vec!["name", "phone"]);
    }
}
