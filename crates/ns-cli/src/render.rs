//! SOUL.md: the promoted axioms of a run as a markdown identity document,
//! one section per dimension.

use std::collections::BTreeMap;
use std::fmt::Write;

use ns_core::{Axiom, Dimension, RunReport};

pub fn render_soul(report: &RunReport, axioms: &[Axiom]) -> String {
    let mut by_dimension: BTreeMap<Dimension, Vec<&Axiom>> = BTreeMap::new();
    for axiom in axioms.iter().filter(|a| a.is_promoted()) {
        by_dimension.entry(axiom.dimension).or_default().push(axiom);
    }

    let mut out = String::from("# SOUL\n\n");
    let _ = writeln!(
        out,
        "_Distilled by neon-soul from {} signals into {} axioms (run {}, {})._",
        report.signals_total, report.promoted, report.run_id, report.finished_at
    );

    if by_dimension.is_empty() {
        out.push_str("\nNo axioms have been promoted yet.\n");
        for note in &report.notes {
            let _ = writeln!(out, "\n> {note}");
        }
        return out;
    }

    for (dimension, axioms) in &by_dimension {
        let _ = writeln!(out, "\n## {}\n", dimension.title());
        for axiom in axioms {
            let _ = writeln!(
                out,
                "- **{}** _({}, n={})_",
                axiom.text(),
                axiom.centrality.as_str(),
                axiom.n_count
            );
            let forms = &axiom.canonical_forms;
            let notation: Vec<&str> = [&forms.cjk, &forms.emoji, &forms.math]
                .into_iter()
                .filter_map(|f| f.as_deref())
                .collect();
            if !notation.is_empty() {
                let _ = writeln!(out, "  - {}", notation.join(" · "));
            }
            for tension in &axiom.tensions {
                let _ = writeln!(
                    out,
                    "  - in tension ({}){}",
                    tension.severity.as_str(),
                    tension
                        .description
                        .as_deref()
                        .map(|d| format!(": {d}"))
                        .unwrap_or_default()
                );
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use ns_core::{CanonicalForms, Centrality};

    use super::*;

    fn axiom(text: &str, dimension: Dimension) -> Axiom {
        Axiom {
            canonical_forms: CanonicalForms::native(text),
            dimension,
            centrality: Centrality::Core,
            n_count: 4,
            ..Axiom::default()
        }
    }

    #[test]
    fn test_sections_follow_dimension_order() {
        let report = RunReport {
            signals_total: 9,
            promoted: 2,
            ..RunReport::default()
        };
        let axioms = [
            axiom("I keep my promises", Dimension::RelationshipDynamics),
            axiom("I tell the truth", Dimension::HonestyFramework),
        ];
        let doc = render_soul(&report, &axioms);
        let honesty = doc.find("## Honesty Framework").unwrap();
        let relations = doc.find("## Relationship Dynamics").unwrap();
        assert!(honesty < relations);
        assert!(doc.contains("- **I tell the truth** _(core, n=4)_"));
        assert!(doc.contains("from 9 signals into 2 axioms"));
    }

    #[test]
    fn test_blocked_candidates_are_left_out() {
        let mut held = axiom("I am always right", Dimension::IdentityCore);
        held.blocked = true;
        let doc = render_soul(&RunReport::default(), &[held]);
        assert!(!doc.contains("always right"));
        assert!(doc.contains("No axioms have been promoted yet."));
    }

    #[test]
    fn test_notation_line_when_present() {
        let mut a = axiom("I tell the truth", Dimension::HonestyFramework);
        a.canonical_forms.cjk = Some("誠".into());
        a.canonical_forms.math = Some("∀x: say(x) → true(x)".into());
        let doc = render_soul(&RunReport::default(), &[a]);
        assert!(doc.contains("  - 誠 · ∀x: say(x) → true(x)"));
    }
}
