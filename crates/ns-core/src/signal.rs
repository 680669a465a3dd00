use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::time::now_iso8601;

/// Identity dimension taxonomy. `Unclassified` collects signals whose
/// dimension could not be determined; it never scores for promotion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Dimension {
    IdentityCore,
    CharacterTraits,
    VoicePresence,
    HonestyFramework,
    BoundariesEthics,
    RelationshipDynamics,
    ContinuityGrowth,
    #[default]
    Unclassified,
}

impl Dimension {
    /// Dimensions a classifier may choose from.
    pub const CLASSIFIABLE: [Dimension; 7] = [
        Self::IdentityCore,
        Self::CharacterTraits,
        Self::VoicePresence,
        Self::HonestyFramework,
        Self::BoundariesEthics,
        Self::RelationshipDynamics,
        Self::ContinuityGrowth,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IdentityCore => "identity-core",
            Self::CharacterTraits => "character-traits",
            Self::VoicePresence => "voice-presence",
            Self::HonestyFramework => "honesty-framework",
            Self::BoundariesEthics => "boundaries-ethics",
            Self::RelationshipDynamics => "relationship-dynamics",
            Self::ContinuityGrowth => "continuity-growth",
            Self::Unclassified => "unclassified",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase().replace(['_', ' '], "-");
        Self::CLASSIFIABLE
            .into_iter()
            .chain([Self::Unclassified])
            .find(|d| d.as_str() == s)
    }

    pub fn from_str_lossy(s: &str) -> Self {
        Self::parse(s).unwrap_or_default()
    }

    /// Human-readable section title used by renderers.
    pub fn title(&self) -> &'static str {
        match self {
            Self::IdentityCore => "Identity Core",
            Self::CharacterTraits => "Character Traits",
            Self::VoicePresence => "Voice & Presence",
            Self::HonestyFramework => "Honesty Framework",
            Self::BoundariesEthics => "Boundaries & Ethics",
            Self::RelationshipDynamics => "Relationship Dynamics",
            Self::ContinuityGrowth => "Continuity & Growth",
            Self::Unclassified => "Unclassified",
        }
    }
}

/// How a statement positions itself relative to the value it names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Stance {
    #[default]
    Assert,
    Deny,
    Question,
    Qualify,
    Tensioning,
}

impl Stance {
    pub const ALL: [Stance; 5] = [
        Self::Assert,
        Self::Deny,
        Self::Question,
        Self::Qualify,
        Self::Tensioning,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assert => "assert",
            Self::Deny => "deny",
            Self::Question => "question",
            Self::Qualify => "qualify",
            Self::Tensioning => "tensioning",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();
        Self::ALL.into_iter().find(|v| v.as_str() == s)
    }

    pub fn from_str_lossy(s: &str) -> Self {
        Self::parse(s).unwrap_or_default()
    }
}

/// Importance tag of a single signal. Distinct from a principle's
/// [`Centrality`](crate::scoring::Centrality).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Core,
    #[default]
    Supporting,
    Peripheral,
}

impl Importance {
    pub const ALL: [Importance; 3] = [Self::Core, Self::Supporting, Self::Peripheral];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Supporting => "supporting",
            Self::Peripheral => "peripheral",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();
        Self::ALL.into_iter().find(|v| v.as_str() == s)
    }

    pub fn from_str_lossy(s: &str) -> Self {
        Self::parse(s).unwrap_or_default()
    }
}

/// Where a statement came from. `SelfAuthored` is the conservative default
/// for records whose provenance is missing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceCategory {
    #[default]
    #[serde(rename = "self")]
    SelfAuthored,
    Curated,
    External,
}

impl SourceCategory {
    pub const ALL: [SourceCategory; 3] = [Self::SelfAuthored, Self::Curated, Self::External];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SelfAuthored => "self",
            Self::Curated => "curated",
            Self::External => "external",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();
        Self::ALL.into_iter().find(|v| v.as_str() == s)
    }

    pub fn from_str_lossy(s: &str) -> Self {
        Self::parse(s).unwrap_or_default()
    }
}

/// Whether the statement was prompted by the user or volunteered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Elicitation {
    UserElicited,
    #[default]
    AgentInitiated,
}

impl Elicitation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserElicited => "user-elicited",
            Self::AgentInitiated => "agent-initiated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace(['_', ' '], "-").as_str() {
            "user-elicited" => Some(Self::UserElicited),
            "agent-initiated" => Some(Self::AgentInitiated),
            _ => None,
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        Self::parse(s).unwrap_or_default()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    #[serde(default)]
    pub source_category: SourceCategory,
    #[serde(default)]
    pub source_file: String,
    #[serde(default = "unknown_timestamp")]
    pub extracted_at: String,
    #[serde(default)]
    pub elicitation: Elicitation,
}

impl Default for Provenance {
    fn default() -> Self {
        Self {
            source_category: SourceCategory::default(),
            source_file: String::new(),
            extracted_at: unknown_timestamp(),
            elicitation: Elicitation::default(),
        }
    }
}

fn unknown_timestamp() -> String {
    crate::time::EPOCH_ISO8601.to_string()
}

/// One raw text block handed over by a source reader.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBlock {
    pub text: String,
    pub source_category: SourceCategory,
    pub source_file: String,
    pub timestamp: String,
    pub elicitation: Elicitation,
}

impl SourceBlock {
    pub fn new(text: impl Into<String>, source_file: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source_category: SourceCategory::default(),
            source_file: source_file.into(),
            timestamp: now_iso8601(),
            elicitation: Elicitation::default(),
        }
    }

    pub fn with_category(mut self, category: SourceCategory) -> Self {
        self.source_category = category;
        self
    }

    pub fn with_elicitation(mut self, elicitation: Elicitation) -> Self {
        self.elicitation = elicitation;
        self
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    pub fn content_hash(&self) -> String {
        crate::tokenizer::content_hash(&self.text)
    }
}

/// An atomic identity-bearing statement. Immutable once extracted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub id: Uuid,
    pub text: String,
    #[serde(default)]
    pub generalized_text: Option<String>,
    #[serde(default)]
    pub dimension: Dimension,
    #[serde(default)]
    pub stance: Stance,
    #[serde(default)]
    pub importance: Importance,
    #[serde(default)]
    pub provenance: Provenance,
    #[serde(default)]
    pub content_hash: String,
}

impl Signal {
    /// A signal for `block` with every classification at its fallback.
    pub fn from_block(block: &SourceBlock) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: block.text.trim().to_string(),
            generalized_text: None,
            dimension: Dimension::Unclassified,
            stance: Stance::Assert,
            importance: Importance::Supporting,
            provenance: Provenance {
                source_category: block.source_category,
                source_file: block.source_file.clone(),
                extracted_at: crate::time::canonicalize(&block.timestamp)
                    .unwrap_or_else(now_iso8601),
                elicitation: block.elicitation,
            },
            content_hash: block.content_hash(),
        }
    }

    /// Text used for similarity: the actor-agnostic paraphrase when present.
    pub fn comparable_text(&self) -> &str {
        self.generalized_text.as_deref().unwrap_or(&self.text)
    }

    pub fn source_category(&self) -> SourceCategory {
        self.provenance.source_category
    }
}
