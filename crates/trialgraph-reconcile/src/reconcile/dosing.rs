//! Dosing consolidation.
//!
//! Sub-extractors report the same regimen several times, each copy carrying
//! a different subset of fields. Copies are grouped by treatment name (exact
//! normalized match, then substring) and collapsed into the most complete
//! member.

use crate::config::ReconcileConfig;
use crate::pass::Pass;
use trialgraph_model::{normalize_label, DosingRegimen, Issue};

/// Why a "treatment name" looks like a sentence fragment rather than a product.
pub fn reject_treatment_name(name: &str, config: &ReconcileConfig) -> Option<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Some("treatment name is empty".to_string());
    }
    if !trimmed.chars().next().is_some_and(char::is_alphanumeric) {
        return Some(format!("{trimmed:?} does not start with a letter or digit"));
    }
    if !trimmed.chars().any(char::is_alphabetic) {
        return Some(format!("{trimmed:?} contains no letters"));
    }
    if trimmed.contains(|c: char| matches!(c, ';' | ':' | '!' | '?'))
        || trimmed.contains(". ")
        || trimmed.ends_with('.')
    {
        return Some(format!("{trimmed:?} contains sentence punctuation"));
    }
    let normalized = normalize_label(trimmed);
    let words: Vec<&str> = normalized.split(' ').collect();
    if let Some(first) = words.first() {
        if config
            .treatment_name_stopwords
            .iter()
            .any(|stop| stop.eq_ignore_ascii_case(first))
        {
            return Some(format!("{trimmed:?} starts with the stopword {first:?}"));
        }
    }
    if words.len() > config.max_treatment_name_words {
        return Some(format!(
            "{trimmed:?} has {} words (max {})",
            words.len(),
            config.max_treatment_name_words
        ));
    }
    None
}

struct Group {
    key: String,
    members: Vec<usize>,
}

/// Reject prose-fragment names, group the rest, and return one canonical
/// regimen per group in first-seen order.
pub fn consolidate_regimens(pass: &mut Pass<'_>, regimens: &[DosingRegimen]) -> Vec<DosingRegimen> {
    let mut groups: Vec<Group> = Vec::new();

    for (i, regimen) in regimens.iter().enumerate() {
        if let Some(reason) = reject_treatment_name(&regimen.treatment_name, pass.config) {
            pass.stats.dropped_facts += 1;
            pass.issues.push(
                Issue::warning(
                    "dosing_treatment_name_rejected",
                    "/administrations",
                    format!("dosing regimen {} dropped: {reason}", regimen.id),
                )
                .with_ids([regimen.id.clone()])
                .with_suggestion("check the dosing extractor output for a sentence captured as a name"),
            );
            continue;
        }

        let key = normalize_label(&regimen.treatment_name);
        let slot = groups
            .iter()
            .position(|g| g.key == key)
            .or_else(|| {
                groups
                    .iter()
                    .position(|g| g.key.contains(&key) || key.contains(&g.key))
            });
        match slot {
            Some(at) => groups[at].members.push(i),
            None => groups.push(Group {
                key,
                members: vec![i],
            }),
        }
    }

    let mut out = Vec::with_capacity(groups.len());
    for group in groups {
        let mut best = group.members[0];
        for &m in &group.members[1..] {
            if regimens[m].completeness() > regimens[best].completeness() {
                best = m;
            }
        }

        let mut canonical = regimens[best].clone();
        let discarded: Vec<&DosingRegimen> = group
            .members
            .iter()
            .filter(|&&m| m != best)
            .map(|&m| &regimens[m])
            .collect();
        for other in &discarded {
            canonical.absorb(other);
        }

        if !discarded.is_empty() {
            let ids: Vec<String> = discarded.iter().map(|r| r.id.clone()).collect();
            pass.issues.push(
                Issue::warning(
                    "dosing_regimen_consolidated",
                    "/administrations",
                    format!(
                        "{} duplicate regimen(s) for {:?} merged into {}: {}",
                        ids.len(),
                        canonical.treatment_name,
                        canonical.id,
                        ids.join(", ")
                    ),
                )
                .with_ids(std::iter::once(canonical.id.clone()).chain(ids)),
            );
        }
        out.push(canonical);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::DocumentContext;

    fn regimen(id: &str, name: &str) -> DosingRegimen {
        DosingRegimen {
            id: id.to_string(),
            treatment_name: name.to_string(),
            dose: None,
            frequency: None,
            route: None,
            duration: None,
            start_day: None,
            titration: vec![],
            provenance: String::new(),
        }
    }

    #[test]
    fn prose_fragments_are_rejected() {
        let config = ReconcileConfig::default();
        assert!(reject_treatment_name("Drug X", &config).is_none());
        assert!(reject_treatment_name("ABC-123 200 mg", &config).is_none());
        assert!(reject_treatment_name("patients will receive", &config).is_some());
        assert!(reject_treatment_name("the study drug", &config).is_some());
        assert!(reject_treatment_name("Dosing continues. Then", &config).is_some());
        assert!(reject_treatment_name("(see table)", &config).is_some());
        assert!(reject_treatment_name("one two three four five six seven", &config).is_some());
    }

    #[test]
    fn substring_names_join_the_same_group() {
        let config = ReconcileConfig::default();
        let context = DocumentContext::default();
        let mut pass = Pass::new(&config, &context, None);

        let mut a = regimen("d1", "Drug X");
        a.dose = Some("10 mg".to_string());
        let mut b = regimen("d2", "Drug X tablets");
        b.route = Some("oral".to_string());
        b.frequency = Some("QD".to_string());
        let c = regimen("d3", "Placebo");

        let out = consolidate_regimens(&mut pass, &[a, b, c]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, "d2");
        assert_eq!(out[0].dose.as_deref(), Some("10 mg"));
        assert_eq!(out[1].id, "d3");
        assert_eq!(pass.issues.by_category("dosing_regimen_consolidated").count(), 1);
    }

    #[test]
    fn rejected_names_are_counted_not_silent() {
        let config = ReconcileConfig::default();
        let context = DocumentContext::default();
        let mut pass = Pass::new(&config, &context, None);
        let out = consolidate_regimens(&mut pass, &[regimen("d1", "subjects who tolerate")]);
        assert!(out.is_empty());
        assert_eq!(pass.stats.dropped_facts, 1);
        assert_eq!(pass.issues.by_category("dosing_treatment_name_rejected").count(), 1);
    }
}
