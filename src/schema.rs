use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::dom::{DomSnapshot, RawElement};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Textarea,
    Select,
    Checkbox,
    Radio,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOption {
    pub value: String,
    pub label: String,
    pub selected: bool,
}

/// Structured description of one form input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Stable within a page: the element id, else its name.
    pub id: String,
    pub kind: FieldKind,
    /// Only set from an explicit `label[for]`; never guessed.
    pub label: Option<String>,
    pub name: String,
    pub selector: String,
    pub placeholder: Option<String>,
    pub required: bool,
    pub disabled: bool,
    pub options: Vec<FieldOption>,
    pub current_value: String,
}

impl FieldDescriptor {
    /// Human-facing name: label, then placeholder, then name, then id.
    pub fn display_name(&self) -> &str {
        self.label
            .as_deref()
            .or(self.placeholder.as_deref())
            .filter(|s| !s.is_empty())
            .or(Some(self.name.as_str()).filter(|s| !s.is_empty()))
            .unwrap_or(&self.id)
    }

    /// Texts usable to categorize the field, in priority order.
    pub fn signals(&self) -> impl Iterator<Item = &str> {
        [
            self.label.as_deref(),
            self.placeholder.as_deref(),
            Some(self.name.as_str()),
        ]
        .into_iter()
        .flatten()
        .filter(|s| !s.trim().is_empty())
    }

    pub fn option_values(&self) -> impl Iterator<Item = &str> {
        self.options.iter().map(|o| o.value.as_str())
    }

    /// Locator for one radio button of a radio group.
    pub fn option_selector(&self, value: &str) -> String {
        format!("{}[value=\"{}\"]", self.selector, escape_attr(value))
    }
}

fn escape_attr(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn is_plain_ident(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn id_selector(id: &str) -> String {
    if is_plain_ident(id) {
        format!("#{id}")
    } else {
        format!("[id=\"{}\"]", escape_attr(id))
    }
}

fn name_selector(name: &str) -> String {
    format!("[name=\"{}\"]", escape_attr(name))
}

fn radio_group_selector(name: &str) -> String {
    format!("input[type=\"radio\"][name=\"{}\"]", escape_attr(name))
}

/// Kind of an element, or `None` for inputs that are never filled.
fn classify(el: &RawElement) -> Option<FieldKind> {
    match el.tag.as_str() {
        "select" => return Some(FieldKind::Select),
        "textarea" => return Some(FieldKind::Textarea),
        _ => {}
    }
    match el.input_type.to_ascii_lowercase().as_str() {
        "hidden" | "submit" | "button" | "reset" | "image" => None,
        "checkbox" => Some(FieldKind::Checkbox),
        "radio" => Some(FieldKind::Radio),
        "file" => Some(FieldKind::File),
        _ => Some(FieldKind::Text),
    }
}

/// Decode one element, falling back to whatever identifying attributes can
/// be salvaged.
fn parse_element(index: usize, value: &serde_json::Value) -> RawElement {
    match serde_json::from_value::<RawElement>(value.clone()) {
        Ok(el) => el,
        Err(e) => {
            warn!(index, error = %e, "malformed element; emitting minimal descriptor");
            let text = |key: &str| {
                value
                    .get(key)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string()
            };
            let tag = text("tag");
            RawElement {
                tag: if tag.is_empty() { "input".to_string() } else { tag },
                input_type: text("type"),
                id: text("id"),
                name: text("name"),
                ..RawElement::default()
            }
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Turn a snapshot into field descriptors in document order.
///
/// Elements that cannot be re-located by a unique id or name are skipped.
/// Radios sharing a name collapse into a single `Radio` descriptor whose
/// options are the individual buttons.
pub fn extract_fields(snapshot: &DomSnapshot) -> Result<Vec<FieldDescriptor>> {
    if !snapshot.is_settled() {
        return Err(Error::PageNotReady(format!(
            "document is still {}",
            snapshot.ready_state
        )));
    }

    let elements: Vec<RawElement> = snapshot
        .elements
        .iter()
        .enumerate()
        .map(|(i, v)| parse_element(i, v))
        .collect();

    let mut id_counts: HashMap<&str, usize> = HashMap::new();
    let mut name_counts: HashMap<&str, usize> = HashMap::new();
    for el in &elements {
        if !el.id.is_empty() {
            *id_counts.entry(el.id.as_str()).or_default() += 1;
        }
        if !el.name.is_empty() {
            *name_counts.entry(el.name.as_str()).or_default() += 1;
        }
    }

    let mut fields: Vec<FieldDescriptor> = Vec::new();
    let mut radio_groups: HashMap<String, usize> = HashMap::new();

    for (index, el) in elements.iter().enumerate() {
        let Some(kind) = classify(el) else {
            continue;
        };
        let unique_id = !el.id.is_empty()
            && id_counts.get(el.id.as_str()) == Some(&1)
            && el.id_matches.map_or(true, |n| n == 1);
        let unique_name = !el.name.is_empty()
            && name_counts.get(el.name.as_str()) == Some(&1)
            && el.name_matches.map_or(true, |n| n == 1);
        let label = if el.id.is_empty() {
            None
        } else {
            el.label.as_deref().and_then(non_empty)
        };

        if kind == FieldKind::Radio && !el.name.is_empty() {
            let option = FieldOption {
                value: el.value.clone(),
                label: label.clone().unwrap_or_else(|| el.value.clone()),
                selected: el.checked,
            };
            if let Some(&pos) = radio_groups.get(&el.name) {
                let group = &mut fields[pos];
                group.required |= el.required;
                if el.checked {
                    group.current_value = el.value.clone();
                }
                group.options.push(option);
            } else {
                radio_groups.insert(el.name.clone(), fields.len());
                fields.push(FieldDescriptor {
                    id: el.name.clone(),
                    kind,
                    label: None,
                    name: el.name.clone(),
                    selector: radio_group_selector(&el.name),
                    placeholder: None,
                    required: el.required,
                    disabled: el.disabled,
                    current_value: if el.checked { el.value.clone() } else { String::new() },
                    options: vec![option],
                });
            }
            continue;
        }

        let (id, selector) = if unique_id {
            (el.id.clone(), id_selector(&el.id))
        } else if unique_name {
            (el.name.clone(), name_selector(&el.name))
        } else {
            warn!(
                index,
                id = %el.id,
                name = %el.name,
                "skipping element without a unique id or name"
            );
            continue;
        };

        let options = if kind == FieldKind::Select {
            el.options
                .iter()
                .map(|o| FieldOption {
                    value: o.value.clone(),
                    label: o.text.clone(),
                    selected: o.selected,
                })
                .collect()
        } else {
            Vec::new()
        };

        let current_value = match kind {
            FieldKind::Checkbox => el.checked.to_string(),
            _ => el.value.clone(),
        };

        fields.push(FieldDescriptor {
            id,
            kind,
            label,
            name: el.name.clone(),
            selector,
            placeholder: non_empty(&el.placeholder),
            required: el.required,
            disabled: el.disabled,
            options,
            current_value,
        });
    }

    debug!(fields = fields.len(), elements = elements.len(), "extracted form schema");
    Ok(fields)
}
