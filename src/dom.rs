use serde::{Deserialize, Serialize};

/// Read-only capture of the interactive elements on a page, in document order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomSnapshot {
    pub url: String,
    /// `document.readyState` at capture time.
    pub ready_state: String,
    /// Raw per-element payloads. Kept untyped so a single malformed entry
    /// cannot poison the whole snapshot.
    pub elements: Vec<serde_json::Value>,
}

impl DomSnapshot {
    pub fn is_settled(&self) -> bool {
        matches!(self.ready_state.as_str(), "interactive" | "complete")
    }
}

/// One `input`, `select` or `textarea` as reported by the page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawElement {
    pub tag: String,
    #[serde(rename = "type")]
    pub input_type: String,
    pub id: String,
    pub name: String,
    pub placeholder: String,
    pub value: String,
    pub required: bool,
    pub disabled: bool,
    pub checked: bool,
    /// Text of a `label[for=id]`, if one exists.
    pub label: Option<String>,
    /// Elements anywhere in the document carrying this id. Absent when the
    /// surface did not count them.
    pub id_matches: Option<u32>,
    /// Same for the name attribute.
    pub name_matches: Option<u32>,
    pub options: Vec<RawOption>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawOption {
    pub value: String,
    pub text: String,
    pub selected: bool,
}
