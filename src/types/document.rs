use serde::{Deserialize, Serialize};

/// Placeholder the editor shows for frames whose name was never set.
pub const DEFAULT_FRAME_NAME: &str = "Frame";

/// Prefix carried by every page id in the editor's store.
pub const PAGE_ID_PREFIX: &str = "page:";

/// Prefix carried by every shape id (frames included) in the editor's store.
pub const SHAPE_ID_PREFIX: &str = "shape:";

/// Page/frame structure of the sketch open in the editor.
///
/// Enumerated fresh for every export call and never cached across calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub pages: Vec<Page>,
    #[serde(default)]
    pub shape_count: usize,
}

impl Document {
    pub fn new(pages: Vec<Page>, shape_count: usize) -> Self {
        Self { pages, shape_count }
    }

    /// A document with no shapes on any page has nothing to render.
    pub fn is_empty(&self) -> bool {
        self.shape_count == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub frames: Vec<Frame>,
}

impl Page {
    pub fn new(id: impl Into<String>, name: impl Into<String>, frames: Vec<Frame>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            frames,
        }
    }

    /// Id with the conventional `page:` prefix removed.
    pub fn bare_id(&self) -> &str {
        self.id.strip_prefix(PAGE_ID_PREFIX).unwrap_or(&self.id)
    }
}

/// A named sub-region of a page.
///
/// The stored name is kept exactly as the editor reports it; an empty name is
/// only replaced by [`DEFAULT_FRAME_NAME`] when displayed, matched, or slugged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    pub id: String,
    pub name: String,
}

impl Frame {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            DEFAULT_FRAME_NAME
        } else {
            &self.name
        }
    }

    /// Id with the conventional `shape:` prefix removed.
    pub fn bare_id(&self) -> &str {
        self.id.strip_prefix(SHAPE_ID_PREFIX).unwrap_or(&self.id)
    }
}
