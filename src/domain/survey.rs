use serde::{Deserialize, Serialize};

/// One entry of the survey registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyConfig {
    /// Node id, the number from the portal download URL.
    pub id: String,
    /// Destination filename on the publication store.
    pub file: String,
    /// Survey title carried into the cleaned dataset.
    pub name: String,
    /// Responses with the same answers and within this number of seconds
    /// from each other are removed. Absent means duplicates are tolerated
    /// for this survey.
    #[serde(default)]
    pub completion_threshold: Option<u64>,
}
