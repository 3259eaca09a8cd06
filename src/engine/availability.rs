use crate::clock::SlotClock;
use crate::model::*;

// ── Availability Algorithm ────────────────────────────────────────

/// Start slots at which a booking of `duration` slots fits on one RoomDay.
///
/// Candidates are `[open, close - duration]`. Each reservation `r` blocks the
/// starts `[r.begin - duration + 1, r.begin + r.duration - 1]`; `earliest`
/// additionally drops every start before it (no retroactive booking).
/// Input reservations may overlap each other; their blocked ranges merge.
pub fn bookable_starts(
    reservations: &[Reservation],
    duration: Slot,
    clock: &SlotClock,
    earliest: Option<Slot>,
) -> Vec<Slot> {
    if duration == 0 || duration > clock.window_len() {
        return Vec::new();
    }
    let first = clock.open_slot().max(earliest.unwrap_or(0));
    let last_exclusive = clock.close_slot() - duration + 1;
    if first >= last_exclusive {
        return Vec::new();
    }

    let candidates = [SlotSpan::new(first, last_exclusive)];
    let blocked = blocked_starts(reservations, duration);
    subtract_intervals(&candidates, &blocked)
        .iter()
        .flat_map(SlotSpan::slots)
        .collect()
}

/// Merged ranges of start slots whose `duration`-long booking would overlap
/// one of `reservations`.
pub fn blocked_starts(reservations: &[Reservation], duration: Slot) -> Vec<SlotSpan> {
    if duration == 0 {
        return Vec::new();
    }
    let mut blocked: Vec<SlotSpan> = reservations
        .iter()
        .filter(|r| r.duration > 0)
        .map(|r| {
            SlotSpan::new(
                (r.begin_slot + 1).saturating_sub(duration),
                r.begin_slot + r.duration,
            )
        })
        .collect();
    blocked.sort_by_key(|s| s.start);
    merge_overlapping(&blocked)
}

/// Merged occupied ranges of a RoomDay.
pub fn occupied(reservations: &[Reservation]) -> Vec<SlotSpan> {
    let mut spans: Vec<SlotSpan> = reservations
        .iter()
        .filter(|r| r.duration > 0)
        .map(Reservation::span)
        .collect();
    spans.sort_by_key(|s| s.start);
    merge_overlapping(&spans)
}

/// Merge sorted overlapping/adjacent ranges into disjoint ranges.
pub fn merge_overlapping(sorted: &[SlotSpan]) -> Vec<SlotSpan> {
    let mut merged: Vec<SlotSpan> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Remove sorted, disjoint `to_remove` ranges from sorted, disjoint `base`.
pub fn subtract_intervals(base: &[SlotSpan], to_remove: &[SlotSpan]) -> Vec<SlotSpan> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut cursor = b.start;

        while ri < to_remove.len() && to_remove[ri].end <= cursor {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < b.end {
            let r = to_remove[j];
            if r.start > cursor {
                result.push(SlotSpan::new(cursor, r.start));
            }
            cursor = cursor.max(r.end);
            j += 1;
        }

        if cursor < b.end {
            result.push(SlotSpan::new(cursor, b.end));
        }
    }

    result
}
