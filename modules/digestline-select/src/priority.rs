//! Daily rotation of priority categories.
//!
//! With N priority categories, the list is rotated left by
//! `day_of_year mod N`, so every priority category leads exactly once every
//! N days.

use digestline_common::CategoryGroup;

/// Rotate `priorities` left by `day_of_year mod N`.
pub fn rotate(priorities: &[String], day_of_year: u32) -> Vec<String> {
    if priorities.is_empty() {
        return Vec::new();
    }
    let seed = day_of_year as usize % priorities.len();
    let mut rotated = priorities.to_vec();
    rotated.rotate_left(seed);
    rotated
}

/// Order groups for a run.
///
/// Rotated priority categories come first (those present in `groups`), then
/// every other category by item count descending (name ascending on ties),
/// with "Other" last regardless of its size.
pub fn sort_by_priority(
    mut groups: Vec<CategoryGroup>,
    priorities: &[String],
    day_of_year: u32,
) -> Vec<CategoryGroup> {
    let mut ordered = Vec::with_capacity(groups.len());

    for name in rotate(priorities, day_of_year) {
        if let Some(pos) = groups.iter().position(|g| g.name == name && !g.is_other()) {
            ordered.push(groups.remove(pos));
        }
    }

    let other = groups
        .iter()
        .position(|g| g.is_other())
        .map(|pos| groups.remove(pos));

    groups.sort_by(|a, b| {
        b.items
            .len()
            .cmp(&a.items.len())
            .then_with(|| a.name.cmp(&b.name))
    });
    ordered.extend(groups);
    ordered.extend(other);
    ordered
}
