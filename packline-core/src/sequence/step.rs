//! The `Step` sum type consumed in strict order by the session controller.
//!
//! The set of step kinds is closed and small, so this is a tagged enum with
//! exhaustive matching at every consumer — not a trait hierarchy.

use serde::{Deserialize, Serialize};

/// One unit of the ordered announcement sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Step {
    /// Narration marker: the worker is entering a new location's shelves.
    Location { name: String },
    /// Narration marker: the next items belong to this machine.
    Machine { name: String },
    /// An aggregated pick: everything for one SKU within one machine.
    Item(ItemStep),
}

/// Aggregates every pick task sharing the same machine and SKU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemStep {
    pub sku_name: String,
    /// Optional type label; `None`/empty renders as the bare SKU name.
    pub sku_kind: Option<String>,
    /// Every distinct coil contributing, in encounter order. Non-empty.
    pub coil_codes: Vec<String>,
    /// Sum of needed quantities over the aggregated tasks.
    pub quantity: i64,
    /// Ids of every underlying task, used for completion writes. Non-empty.
    pub source_task_ids: Vec<String>,
}

impl ItemStep {
    /// SKU name with its type suffix, e.g. `"Cola (soda)"`. An absent or
    /// empty type yields just the name.
    pub fn display_name(&self) -> String {
        match self.sku_kind.as_deref() {
            Some(kind) if !kind.trim().is_empty() => format!("{} ({})", self.sku_name, kind),
            _ => self.sku_name.clone(),
        }
    }

    fn coil_phrase(&self) -> String {
        if self.coil_codes.len() == 1 {
            format!("coil {}", self.coil_codes[0])
        } else {
            format!("coils {}", self.coil_codes.join(", "))
        }
    }
}

impl Step {
    /// Whether this step is an aggregated pick (holds for voice commands)
    /// rather than a pure narration marker.
    pub fn is_item(&self) -> bool {
        matches!(self, Step::Item(_))
    }

    /// Ids of the tasks this step completes when advanced past. Empty for
    /// markers.
    pub fn source_task_ids(&self) -> &[String] {
        match self {
            Step::Item(item) => &item.source_task_ids,
            Step::Location { .. } | Step::Machine { .. } => &[],
        }
    }

    /// The phrase handed to the announcement engine for this step.
    pub fn spoken_phrase(&self) -> String {
        match self {
            Step::Location { name } => format!("Location {name}."),
            Step::Machine { name } => format!("Machine {name}."),
            Step::Item(item) => format!(
                "Pack {} {}, {}.",
                item.quantity,
                item.display_name(),
                item.coil_phrase()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(kind: Option<&str>, coils: &[&str]) -> ItemStep {
        ItemStep {
            sku_name: "Cola".into(),
            sku_kind: kind.map(Into::into),
            coil_codes: coils.iter().map(|c| c.to_string()).collect(),
            quantity: 4,
            source_task_ids: vec!["t1".into()],
        }
    }

    #[test]
    fn item_phrase_includes_kind_and_coils() {
        let step = Step::Item(item(Some("soda"), &["E7", "E6"]));
        assert_eq!(step.spoken_phrase(), "Pack 4 Cola (soda), coils E7, E6.");
    }

    #[test]
    fn empty_kind_renders_bare_sku_name() {
        let step = Step::Item(item(Some("  "), &["A1"]));
        assert_eq!(step.spoken_phrase(), "Pack 4 Cola, coil A1.");
        let step = Step::Item(item(None, &["A1"]));
        assert_eq!(step.spoken_phrase(), "Pack 4 Cola, coil A1.");
    }

    #[test]
    fn marker_phrases() {
        assert_eq!(
            Step::Location {
                name: "Riverside".into()
            }
            .spoken_phrase(),
            "Location Riverside."
        );
        assert_eq!(
            Step::Machine { name: "M02".into() }.spoken_phrase(),
            "Machine M02."
        );
    }

    #[test]
    fn step_serializes_with_lowercase_tag() {
        let json = serde_json::to_value(Step::Item(item(None, &["A1"]))).expect("serialize");
        assert_eq!(json["kind"], "item");
        assert_eq!(json["skuName"], "Cola");
        let json = serde_json::to_value(Step::Location {
            name: "Depot".into(),
        })
        .expect("serialize");
        assert_eq!(json["kind"], "location");
        assert_eq!(json["name"], "Depot");
    }
}
