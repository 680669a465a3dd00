//! Versioned JSON export of one committed run.
//!
//! Field names are camelCase and timestamps canonical ISO-8601 UTC. Older
//! documents with missing fields import with conservative defaults.

use serde::{Deserialize, Serialize};

use crate::axiom::Axiom;
use crate::principle::Principle;
use crate::report::RunReport;
use crate::signal::Signal;
use crate::tension::Tension;
use crate::time::{canonicalize_or_epoch, now_iso8601};

pub const EXPORT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportDocument {
    pub version: u32,
    pub exported_at: String,
    pub workspace_id: String,
    pub report: RunReport,
    pub axioms: Vec<Axiom>,
    pub blocked: Vec<Axiom>,
    pub principles: Vec<Principle>,
    pub signals: Vec<Signal>,
    pub tensions: Vec<Tension>,
}

impl ExportDocument {
    pub fn new(workspace_id: &str, report: RunReport) -> Self {
        Self {
            version: EXPORT_VERSION,
            exported_at: now_iso8601(),
            workspace_id: workspace_id.to_string(),
            report,
            ..Self::default()
        }
    }

    /// Split a mixed axiom list into promoted and blocked.
    pub fn with_axioms(mut self, axioms: Vec<Axiom>) -> Self {
        let (blocked, promoted): (Vec<Axiom>, Vec<Axiom>) =
            axioms.into_iter().partition(|a| a.blocked);
        self.axioms = promoted;
        self.blocked = blocked;
        self
    }

    /// Rewrite every timestamp into the canonical form.
    fn canonicalize_timestamps(&mut self) {
        self.exported_at = canonicalize_or_epoch(&self.exported_at);
        for s in &mut self.signals {
            s.provenance.extracted_at = canonicalize_or_epoch(&s.provenance.extracted_at);
        }
        for p in &mut self.principles {
            p.created_at = canonicalize_or_epoch(&p.created_at);
        }
        for a in self.axioms.iter_mut().chain(self.blocked.iter_mut()) {
            a.created_at = canonicalize_or_epoch(&a.created_at);
            for t in &mut a.tensions {
                t.detected_at = canonicalize_or_epoch(&t.detected_at);
            }
        }
        for t in &mut self.tensions {
            t.detected_at = canonicalize_or_epoch(&t.detected_at);
        }
    }
}

pub fn export_json(doc: &ExportDocument) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(doc)
}

pub fn import_json(json: &str) -> Result<ExportDocument, serde_json::Error> {
    let mut doc: ExportDocument = serde_json::from_str(json)?;
    doc.canonicalize_timestamps();
    Ok(doc)
}
