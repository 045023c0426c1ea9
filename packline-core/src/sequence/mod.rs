//! Sequence builder: pick tasks → ordered [`Step`] list.
//!
//! ## Ordering
//!
//! ```text
//! 1. Drop tasks whose needed quantity is ≤ 0
//! 2. Group by location; hinted locations first (hint order), the rest by
//!    case-insensitive name
//! 3. Within a location, machines by case-insensitive code ascending
//! 4. Within a machine, tasks by coil code DESCENDING, then SKU name
//! 5. Re-group by SKU (first-appearance order) → one ItemStep per SKU
//! 6. Emit Location marker, then per machine a Machine marker + its items
//! ```
//!
//! The coil order mirrors the physical walk along a machine: the
//! largest-labelled coil is packed first. Pure function, no side effects,
//! deterministic for any input order.

pub mod step;

use std::collections::HashMap;

use crate::task::PickTask;

pub use step::{ItemStep, Step};

/// Display name for the group of tasks that carry no location.
pub const UNASSIGNED_LOCATION_NAME: &str = "Unassigned";

const UNASSIGNED_KEY: &str = "<unassigned>";

struct LocationGroup<'a> {
    id: String,
    name: String,
    tasks: Vec<&'a PickTask>,
}

struct MachineGroup<'a> {
    code: String,
    tasks: Vec<&'a PickTask>,
}

/// Build the ordered step sequence for a set of pending pick tasks.
///
/// `location_order_hint` is the user-configured location order (may be
/// empty, meaning alphabetical). Locations absent from the hint sort after
/// all hinted ones.
pub fn build_steps(tasks: &[PickTask], location_order_hint: &[String]) -> Vec<Step> {
    let mut groups: Vec<LocationGroup<'_>> = Vec::new();
    let mut group_index: HashMap<String, usize> = HashMap::new();

    for task in tasks.iter().filter(|t| t.needed_quantity() > 0) {
        let (key, name) = match &task.location {
            Some(loc) => (loc.id.clone(), loc.name.clone()),
            None => (
                UNASSIGNED_KEY.to_string(),
                UNASSIGNED_LOCATION_NAME.to_string(),
            ),
        };
        let idx = *group_index.entry(key.clone()).or_insert_with(|| {
            groups.push(LocationGroup {
                id: key,
                name,
                tasks: Vec::new(),
            });
            groups.len() - 1
        });
        groups[idx].tasks.push(task);
    }

    groups.sort_by(|a, b| {
        let pos = |g: &LocationGroup<'_>| location_order_hint.iter().position(|id| *id == g.id);
        match (pos(a), pos(b)) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => (a.name.to_lowercase(), &a.name).cmp(&(b.name.to_lowercase(), &b.name)),
        }
    });

    let mut steps = Vec::new();
    for group in groups {
        steps.push(Step::Location {
            name: group.name.clone(),
        });
        for machine in machine_groups(group.tasks) {
            steps.push(Step::Machine {
                name: machine.code.clone(),
            });
            steps.extend(item_steps(machine.tasks).into_iter().map(Step::Item));
        }
    }
    steps
}

fn machine_groups(tasks: Vec<&PickTask>) -> Vec<MachineGroup<'_>> {
    let mut groups: Vec<MachineGroup<'_>> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for task in tasks {
        let idx = *index.entry(task.machine.id.as_str()).or_insert_with(|| {
            groups.push(MachineGroup {
                code: task.machine.code.clone(),
                tasks: Vec::new(),
            });
            groups.len() - 1
        });
        groups[idx].tasks.push(task);
    }

    groups.sort_by(|a, b| (a.code.to_lowercase(), &a.code).cmp(&(b.code.to_lowercase(), &b.code)));
    groups
}

fn item_steps(mut tasks: Vec<&PickTask>) -> Vec<ItemStep> {
    // Largest-labelled coil first; SKU name breaks ties.
    tasks.sort_by(|a, b| {
        b.coil_code
            .cmp(&a.coil_code)
            .then_with(|| a.sku.name.cmp(&b.sku.name))
    });

    let mut items: Vec<ItemStep> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for task in tasks {
        match index.get(task.sku.id.as_str()) {
            Some(&i) => {
                let item = &mut items[i];
                item.quantity += task.needed_quantity();
                if !item.coil_codes.contains(&task.coil_code) {
                    item.coil_codes.push(task.coil_code.clone());
                }
                item.source_task_ids.push(task.id.clone());
            }
            None => {
                index.insert(task.sku.id.as_str(), items.len());
                items.push(ItemStep {
                    sku_name: task.sku.name.clone(),
                    sku_kind: task.sku.kind.clone(),
                    coil_codes: vec![task.coil_code.clone()],
                    quantity: task.needed_quantity(),
                    source_task_ids: vec![task.id.clone()],
                });
            }
        }
    }
    items
}
