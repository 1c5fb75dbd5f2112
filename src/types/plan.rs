use serde::{Deserialize, Serialize};

/// One concrete export target derived from a selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadPlanEntry {
    pub page_id: String,
    /// `None` exports the whole page.
    pub frame_id: Option<String>,
    /// File name suffix, empty or starting with `-`.
    pub suffix: String,
}

impl DownloadPlanEntry {
    pub fn whole_page(page_id: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            page_id: page_id.into(),
            frame_id: None,
            suffix: suffix.into(),
        }
    }

    pub fn frame(
        page_id: impl Into<String>,
        frame_id: impl Into<String>,
        suffix: impl Into<String>,
    ) -> Self {
        Self {
            page_id: page_id.into(),
            frame_id: Some(frame_id.into()),
            suffix: suffix.into(),
        }
    }
}
