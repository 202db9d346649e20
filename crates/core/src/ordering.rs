//! 決定新項目在已開啟項目中的插入位置。
//! Insertion position of a newly shown entry among the open ones.

use crate::entry::{EntryId, OrderHint};

/// Index at which `new_id` should be inserted into `open_ids`.
///
/// An explicit hint wins when its target is open. Otherwise the entry is
/// placed relative to its neighbours in `preference`: after the nearest open
/// id that precedes it there, else before the nearest open id that follows
/// it, else appended.
pub fn insertion_index(
    new_id: &str,
    hint: Option<&OrderHint>,
    open_ids: &[EntryId],
    preference: &[String],
) -> usize {
    let position_of = |target: &str| open_ids.iter().position(|id| id.as_str() == target);

    match hint {
        Some(OrderHint::First) => return 0,
        Some(OrderHint::Before(target)) => {
            if let Some(index) = position_of(target.as_str()) {
                return index;
            }
        }
        Some(OrderHint::After(target)) => {
            if let Some(index) = position_of(target.as_str()) {
                return index + 1;
            }
        }
        None => {}
    }

    let Some(own) = preference.iter().position(|id| id == new_id) else {
        return open_ids.len();
    };

    if let Some(index) = preference[..own]
        .iter()
        .rev()
        .find_map(|id| position_of(id))
    {
        return index + 1;
    }
    if let Some(index) = preference[own + 1..].iter().find_map(|id| position_of(id)) {
        return index;
    }
    open_ids.len()
}
