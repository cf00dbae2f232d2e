//! Range checks shared by the address queries.

use crate::NodeError;

/// `items[from..to]`, clamped to the slice.
pub fn paginate<T: Clone>(items: &[T], from: usize, to: usize) -> Result<Vec<T>, NodeError> {
    if from > to {
        return Err(NodeError::Validation(format!(
            "\"from\" ({from}) is expected to be less than \"to\" ({to})"
        )));
    }
    let end = to.min(items.len());
    let start = from.min(end);
    Ok(items[start..end].to_vec())
}

/// Reject a `from..to` window wider than `max`.
pub fn check_span(from: usize, to: usize, max: usize) -> Result<(), NodeError> {
    if to.saturating_sub(from) > max {
        return Err(NodeError::Validation(format!(
            "\"from\" ({from}) and \"to\" ({to}) range should be less than or equal to {max}"
        )));
    }
    Ok(())
}

/// Normalize an optional `(start, end)` height range for the daemon,
/// which wants the low height first. Both bounds must be given for a range
/// to apply, and `end` may not exceed `start`.
pub fn height_range(start: Option<u64>, end: Option<u64>) -> Result<Option<(u64, u64)>, NodeError> {
    match (start, end) {
        (Some(start), Some(end)) => {
            if end > start {
                return Err(NodeError::Validation(
                    "\"end\" is expected to be less than or equal to \"start\"".into(),
                ));
            }
            Ok(Some((end, start)))
        }
        _ => Ok(None),
    }
}
