//! Selection policies (§4.6): the order in which non-empty classes are
//! offered a chance to dispatch in one service round.

use crate::class::ClassState;
use gateway_core::config::SelectionPolicy;

/// Returns indices into `classes` (not class ids) in service order for one
/// round. Empty classes are still included; the caller skips them.
pub fn service_order(policy: SelectionPolicy, classes: &[ClassState]) -> Vec<usize> {
    match policy {
        SelectionPolicy::Strict => {
            // Higher-capacity class (lower id) always drains before lower
            // capacity ones — a fixed ascending scan.
            (0..classes.len()).collect()
        }
        SelectionPolicy::Wfq => {
            let mut indices: Vec<usize> = (0..classes.len()).collect();
            indices.sort_by(|&a, &b| {
                virtual_time(&classes[a])
                    .partial_cmp(&virtual_time(&classes[b]))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            indices
        }
        SelectionPolicy::Drr => {
            for class in classes {
                if !class.queue_is_empty() {
                    *class.drr_deficit.lock().unwrap() += class.capacity_tps.max(1.0);
                }
            }
            let mut indices: Vec<usize> = (0..classes.len()).collect();
            indices.sort_by(|&a, &b| {
                let da = *classes[a].drr_deficit.lock().unwrap();
                let db = *classes[b].drr_deficit.lock().unwrap();
                db.partial_cmp(&da).unwrap_or(std::cmp::Ordering::Equal)
            });
            indices
        }
    }
}

/// Deficit-style virtual time: `served_count / weight`. A class that has
/// been served proportionally less than its weight entitles it to sorts
/// earlier (smaller virtual time = served sooner).
fn virtual_time(class: &ClassState) -> f64 {
    let served = class.served_count.load(std::sync::atomic::Ordering::Relaxed) as f64;
    served / class.weight.max(0.001)
}

/// Called after a class is actually served, to advance its accounting for
/// whichever policy is active.
pub fn record_service(policy: SelectionPolicy, class: &ClassState) {
    class.served_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    if matches!(policy, SelectionPolicy::Drr) {
        *class.drr_deficit.lock().unwrap() -= 1.0;
    }
}
