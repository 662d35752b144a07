//! Assembly of flat task rows into a rooted tree with aggregated metrics.
//!
//! Rows are indexed by ID into slots, linked to their parent's slot, and then
//! folded bottom-up. No row holds a pointer to another; parent/child relations
//! live only in the slot index while the tree is being built.

use crate::types::Task;
use std::collections::HashMap;
use tracing::debug;

/// Build a tree from `rows`, whose first element is the root.
///
/// Every other row is attached beneath its parent if the parent is present in
/// `rows`. Rows whose parent is missing (and anything beneath them) are left
/// out of the result. Children keep the order in which they appear in `rows`.
///
/// Returns `None` only when `rows` is empty.
pub fn assemble(rows: Vec<Task>) -> Option<Task> {
    if rows.is_empty() {
        return None;
    }

    let row_count = rows.len();
    let mut slots: Vec<Option<Task>> = rows.into_iter().map(Some).collect();

    // ID -> slot. The first occurrence of an ID wins.
    let mut index: HashMap<i64, usize> = HashMap::with_capacity(row_count);
    for (slot, row) in slots.iter().enumerate() {
        if let Some(row) = row {
            index.entry(row.id).or_insert(slot);
        }
    }

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); row_count];
    for slot in 1..row_count {
        let Some(row) = slots[slot].as_ref() else {
            continue;
        };
        if index.get(&row.id) != Some(&slot) {
            continue;
        }
        match row.parent_id.and_then(|pid| index.get(&pid)) {
            Some(&parent_slot) if parent_slot != slot => children[parent_slot].push(slot),
            _ => debug!(task_id = row.id, parent_id = ?row.parent_id, "Dropping orphan row"),
        }
    }

    // Pre-order from the root; reversing it visits every child before its parent.
    let mut order = Vec::with_capacity(row_count);
    let mut stack = vec![0usize];
    while let Some(slot) = stack.pop() {
        order.push(slot);
        stack.extend(children[slot].iter().rev());
    }

    let mut built: Vec<Option<Task>> = vec![None; row_count];
    for &slot in order.iter().rev() {
        // `order` visits each reachable slot exactly once, so the row is still there.
        let Some(mut node) = slots[slot].take() else {
            debug!(slot, "Slot visited twice during assembly");
            continue;
        };
        node.sub_tasks = children[slot]
            .iter()
            .filter_map(|&child| built[child].take())
            .collect();
        compute_metrics(&mut node);
        built[slot] = Some(node);
    }

    built[0].take()
}

/// Recompute `total_count`, `completed_count` and `progress` for `node` from
/// its direct children, whose own metrics must already be current.
pub fn compute_metrics(node: &mut Task) {
    let mut total = 0;
    let mut completed = 0;
    for child in &node.sub_tasks {
        total += child.total_count + 1;
        completed += child.completed_count;
        if child.completed {
            completed += 1;
        }
    }
    node.total_count = total;
    node.completed_count = completed;
    node.progress = if total == 0 {
        0.0
    } else {
        completed as f64 / total as f64
    };
}

/// Number of nodes in the tree rooted at `task`, including `task`.
pub fn node_count(task: &Task) -> usize {
    let mut count = 0;
    let mut stack = vec![task];
    while let Some(node) = stack.pop() {
        count += 1;
        stack.extend(node.sub_tasks.iter());
    }
    count
}
