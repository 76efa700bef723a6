//! Next-review calculation: composes the strength formulas into a single
//! item update.

use crate::config::CoreConfig;
use crate::domain::{Item, ReviewRecord};
use crate::strength;
use chrono::Duration;

/// Apply one review record to an item.
///
/// `history` is the item's review history *before* this record. Returns a
/// new item value with updated counts, sensitivity, and next review time;
/// all other fields are unchanged. Never fails: the formulas keep every
/// intermediate finite.
pub fn compute_update(
    item: &Item,
    record: &ReviewRecord,
    history: &[ReviewRecord],
    config: &CoreConfig,
) -> Item {
    let virtual_count = strength::virtual_count_after(item.virtual_review_count, record.action);
    let actual_count = item.actual_review_count + 1;
    let sensitivity = strength::sensitivity(virtual_count, actual_count);

    let base = strength::base_interval_ms(config.base_interval_ms, sensitivity, virtual_count);
    let factor = strength::dwell_factor(record.dwell_millis, strength::average_dwell(history));
    let interval_ms = strength::final_interval_ms(base, factor, config.min_interval_ms);

    Item {
        virtual_review_count: virtual_count,
        actual_review_count: actual_count,
        sensitivity,
        next_review_time: record.review_time + Duration::milliseconds(interval_ms),
        ..item.clone()
    }
}
