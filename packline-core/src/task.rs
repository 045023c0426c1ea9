//! Pick-task domain model.
//!
//! A [`PickTask`] is one SKU-at-coil requirement within a run: "put N units
//! of this SKU into coil E7 of machine M02 at the Riverside location". The
//! persistence layer supplies these already scoped to a run; the core only
//! reads them (and writes back the completion flag through
//! [`crate::store::CompletionStore`]).

use serde::{Deserialize, Serialize};

/// Selects which numeric field of [`Quantities`] represents "needed quantity"
/// for a SKU. A property of the SKU, editable out-of-band, which is why
/// [`PickTask::needed_quantity`] recomputes on every call instead of caching.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CountSource {
    Current,
    Par,
    Need,
    Forecast,
    #[default]
    Total,
}

/// One numeric value per possible [`CountSource`], plus a fallback base
/// quantity used when the selected source carries no value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct Quantities {
    pub current: Option<i64>,
    pub par: Option<i64>,
    pub need: Option<i64>,
    pub forecast: Option<i64>,
    pub total: Option<i64>,
    pub base: i64,
}

impl Quantities {
    /// The value behind a given count source, if any.
    pub fn get(&self, source: CountSource) -> Option<i64> {
        match source {
            CountSource::Current => self.current,
            CountSource::Par => self.par,
            CountSource::Need => self.need,
            CountSource::Forecast => self.forecast,
            CountSource::Total => self.total,
        }
    }
}

/// A grouping key for tasks: the physical site a machine lives at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRef {
    pub id: String,
    pub name: String,
}

/// A vending machine. Belongs to exactly one location (or none, when the
/// owning task has no location either).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineRef {
    pub id: String,
    /// Short display code announced to the worker, e.g. `"M02"`.
    pub code: String,
}

/// A stock-keeping unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkuRef {
    pub id: String,
    pub name: String,
    /// Optional type label ("chips", "soda"). `None`/empty renders as just
    /// the SKU name downstream.
    pub kind: Option<String>,
    #[serde(default)]
    pub count_source: CountSource,
}

/// One unit of required packing work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickTask {
    pub id: String,
    /// Tasks without a location form an "unassigned" group.
    pub location: Option<LocationRef>,
    pub machine: MachineRef,
    /// Identifies the physical slot within the machine, e.g. `"E7"`.
    pub coil_code: String,
    pub sku: SkuRef,
    pub quantities: Quantities,
    #[serde(default)]
    pub completed: bool,
}

impl PickTask {
    /// Needed quantity: `quantities[sku.count_source]`, falling back to the
    /// base quantity. Recomputed per call — the count source can be edited
    /// out-of-band between builds.
    pub fn needed_quantity(&self) -> i64 {
        self.quantities
            .get(self.sku.count_source)
            .unwrap_or(self.quantities.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_with(source: CountSource, quantities: Quantities) -> PickTask {
        PickTask {
            id: "t1".into(),
            location: None,
            machine: MachineRef {
                id: "m1".into(),
                code: "M01".into(),
            },
            coil_code: "A1".into(),
            sku: SkuRef {
                id: "s1".into(),
                name: "Cola".into(),
                kind: Some("soda".into()),
                count_source: source,
            },
            quantities,
            completed: false,
        }
    }

    #[test]
    fn needed_quantity_follows_count_source() {
        let task = task_with(
            CountSource::Par,
            Quantities {
                par: Some(6),
                total: Some(2),
                base: 1,
                ..Default::default()
            },
        );
        assert_eq!(task.needed_quantity(), 6);
    }

    #[test]
    fn needed_quantity_falls_back_to_base_when_source_is_empty() {
        let task = task_with(
            CountSource::Forecast,
            Quantities {
                total: Some(9),
                base: 3,
                ..Default::default()
            },
        );
        assert_eq!(task.needed_quantity(), 3);
    }

    #[test]
    fn count_source_defaults_to_total() {
        assert_eq!(CountSource::default(), CountSource::Total);
        let json = r#"{"id":"s","name":"Water","kind":null}"#;
        let sku: SkuRef = serde_json::from_str(json).expect("deserialize sku");
        assert_eq!(sku.count_source, CountSource::Total);
    }

    #[test]
    fn pick_task_serializes_with_camel_case_fields() {
        let task = task_with(CountSource::Total, Quantities::default());
        let json = serde_json::to_value(&task).expect("serialize task");
        assert_eq!(json["coilCode"], "A1");
        assert_eq!(json["sku"]["countSource"], "total");
        assert_eq!(json["quantities"]["base"], 0);
    }
}
