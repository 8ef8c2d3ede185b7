//! Dosing promotion: canonical regimens become Administration entities.

use crate::pass::Pass;
use crate::records::{self, CanonicalRecord, ResolvedRef};
use crate::resolver::{ResolutionMethod, ResolvedMapping};
use trialgraph_model::{
    normalize_label, slugify, token_similarity, Administration, DosingRegimen, Entity, EntityKind,
    Issue, StudyDesign,
};

/// Best intervention for a treatment name: exact normalized name, then
/// substring either way, then highest token overlap.
pub fn link_intervention(pass: &Pass<'_>, design: &StudyDesign, treatment_name: &str) -> Option<ResolvedMapping> {
    if design.contains(EntityKind::Intervention, treatment_name) {
        return Some(ResolvedMapping::from_alias(treatment_name, treatment_name));
    }
    if let Some(id) = pass.aliases.lookup_exact(EntityKind::Intervention, treatment_name) {
        return Some(ResolvedMapping::from_alias(treatment_name, id));
    }

    let key = normalize_label(treatment_name);
    if let Some(hit) = design.interventions.iter().find(|i| {
        let name = normalize_label(&i.name);
        !name.is_empty() && (name.contains(&key) || key.contains(&name))
    }) {
        return Some(ResolvedMapping {
            label: treatment_name.to_string(),
            entity_id: hit.id.clone(),
            confidence: 0.9,
            rationale: "intervention name substring".to_string(),
            method: ResolutionMethod::Alias,
        });
    }

    let mut best: Option<(f64, &str)> = None;
    for intervention in &design.interventions {
        let score = token_similarity(&intervention.name, treatment_name);
        if score > 0.0 && best.map_or(true, |(top, _)| score > top) {
            best = Some((score, intervention.id.as_str()));
        }
    }
    best.map(|(score, id)| ResolvedMapping {
        label: treatment_name.to_string(),
        entity_id: id.to_string(),
        confidence: score as f32,
        rationale: "intervention token overlap".to_string(),
        method: ResolutionMethod::Alias,
    })
}

pub fn promote_regimens(pass: &mut Pass<'_>, design: &mut StudyDesign, regimens: &[DosingRegimen]) {
    let mut out = Vec::with_capacity(regimens.len());

    for regimen in regimens {
        let link = link_intervention(pass, design, &regimen.treatment_name);
        let id = format!("adm_{}", slugify(&regimen.treatment_name));

        if link.is_none() {
            pass.issues.push(
                Issue::warning(
                    "administration_unlinked",
                    "/administrations",
                    format!(
                        "administration {id} ({:?}) matches no intervention; kept unlinked",
                        regimen.treatment_name
                    ),
                )
                .with_ids([id.clone(), regimen.id.clone()])
                .with_suggestion("add the intervention or align its name with the dosing text"),
            );
        }

        design.upsert(Entity::Administration(Administration {
            id: id.clone(),
            name: regimen.treatment_name.clone(),
            intervention_id: link.as_ref().map(|m| m.entity_id.clone()),
            dose: regimen.dose.clone(),
            frequency: regimen.frequency.clone(),
            route: regimen.route.clone(),
            duration: regimen.duration.clone(),
            titration: regimen.titration.clone(),
            source_fact: Some(regimen.id.clone()),
        }));
        pass.stats.administrations += 1;

        let reference = match &link {
            Some(mapping) => ResolvedRef::from_mapping(EntityKind::Intervention.collection(), mapping),
            None => ResolvedRef::unresolved(&regimen.treatment_name, EntityKind::Intervention.collection()),
        };
        out.push(CanonicalRecord::new(regimen.clone(), vec![reference]));
    }

    let key = pass.record_key(records::DOSING_REGIMENS);
    records::write_record(design, &mut pass.issues, &key, &out);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::AliasIndex;
    use crate::config::ReconcileConfig;
    use crate::resolver::DocumentContext;
    use trialgraph_model::Intervention;

    fn design() -> StudyDesign {
        let mut d = StudyDesign::default();
        for (id, name) in [("int_x", "Drug X 10 mg tablet"), ("int_pbo", "Matching placebo")] {
            d.upsert(Entity::Intervention(Intervention {
                id: id.to_string(),
                name: name.to_string(),
                role: None,
            }));
        }
        d
    }

    fn regimen(id: &str, name: &str) -> DosingRegimen {
        DosingRegimen {
            id: id.to_string(),
            treatment_name: name.to_string(),
            dose: Some("10 mg".to_string()),
            frequency: None,
            route: None,
            duration: None,
            start_day: None,
            titration: vec![],
            provenance: String::new(),
        }
    }

    #[test]
    fn links_by_substring_then_overlap() {
        let config = ReconcileConfig::default();
        let context = DocumentContext::default();
        let design = design();
        let mut pass = Pass::new(&config, &context, None);
        pass.aliases = AliasIndex::build(&design);

        let x = link_intervention(&pass, &design, "Drug X").map(|m| m.entity_id);
        assert_eq!(x.as_deref(), Some("int_x"));
        let pbo = link_intervention(&pass, &design, "placebo capsules").map(|m| m.entity_id);
        assert_eq!(pbo.as_deref(), Some("int_pbo"));
        assert!(link_intervention(&pass, &design, "Rescue medication").is_none());
    }

    #[test]
    fn unlinked_regimens_are_kept_and_flagged() {
        let config = ReconcileConfig::default();
        let context = DocumentContext::default();
        let mut design = design();
        let mut pass = Pass::new(&config, &context, None);
        pass.aliases = AliasIndex::build(&design);

        promote_regimens(&mut pass, &mut design, &[regimen("d1", "Drug X"), regimen("d2", "Rescue medication")]);

        assert_eq!(design.administrations.len(), 2);
        assert_eq!(design.administrations[0].intervention_id.as_deref(), Some("int_x"));
        assert_eq!(design.administrations[1].id, "adm_rescue_medication");
        assert!(design.administrations[1].intervention_id.is_none());
        assert_eq!(pass.issues.by_category("administration_unlinked").count(), 1);
    }
}
