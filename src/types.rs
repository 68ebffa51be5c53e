use serde::{Deserialize, Serialize};

/// Name given to every file handed to the editor, whatever the source format.
pub const UPLOAD_FILE_NAME: &str = "screenshot.png";

/// Type tag posted to the embedding frame when the editor reports a clipboard copy.
pub const COPY_COMPLETE_MESSAGE: &str = "MOCKUP_COPY_COMPLETE";

/// DevTools target id of the tab a run is bound to.
pub type TargetId = String;

/// What the activation boundary hands us: a tab and one or two image URLs
/// (`data:` or `http(s):`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivationRequest {
    pub target: TargetId,
    pub primary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<String>,
}

/// Reply to the activation boundary. Only says whether the tab could be
/// attached, never how the run went.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivationResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActivationResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }
}

/// Image bytes ready to be wrapped in a browser `File`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl ImagePayload {
    pub fn file_name(&self) -> &'static str {
        UPLOAD_FILE_NAME
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    EntryGuard,
    ResetIfOccupied,
    PrimaryUpload,
    TwoPanelSetup,
    LayoutConfiguration,
}

/// Result of one pipeline phase. Only `Aborted` stops a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum PhaseOutcome {
    Completed,
    Degraded(String),
    Aborted(String),
}

impl PhaseOutcome {
    pub fn is_aborted(&self) -> bool {
        matches!(self, PhaseOutcome::Aborted(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseRecord {
    pub phase: Phase,
    #[serde(flatten)]
    pub outcome: PhaseOutcome,
}

/// Ordered list of the phases a run went through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub phases: Vec<PhaseRecord>,
}

impl RunReport {
    pub fn record(&mut self, phase: Phase, outcome: PhaseOutcome) {
        self.phases.push(PhaseRecord { phase, outcome });
    }

    pub fn outcome(&self, phase: Phase) -> Option<&PhaseOutcome> {
        self.phases
            .iter()
            .find(|r| r.phase == phase)
            .map(|r| &r.outcome)
    }

    pub fn entered(&self, phase: Phase) -> bool {
        self.outcome(phase).is_some()
    }

    pub fn aborted(&self) -> bool {
        self.phases.iter().any(|r| r.outcome.is_aborted())
    }

    pub fn extend(&mut self, other: RunReport) {
        self.phases.extend(other.phases);
    }
}
