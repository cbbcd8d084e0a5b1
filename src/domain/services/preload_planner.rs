use chrono::{Datelike, NaiveDate};

use crate::domain::entities::EntryImages;

/// Decides which entries are worth warming next to the one on screen.
pub struct PreloadPlanner;

impl PreloadPlanner {
    /// Indices within `radius` of `index`, nearest first: `index`, `+1`,
    /// `-1`, `+2`, `-2`, ... Out-of-range indices are skipped.
    #[must_use]
    pub fn adjacent_indices(index: usize, len: usize, radius: usize) -> Vec<usize> {
        if index >= len {
            return Vec::new();
        }

        let mut indices = vec![index];
        for distance in 1..=radius {
            if let Some(next) = index.checked_add(distance)
                && next < len
            {
                indices.push(next);
            }
            if let Some(previous) = index.checked_sub(distance) {
                indices.push(previous);
            }
        }
        indices
    }

    /// The months before and after `(year, month)`, wrapping across years.
    #[must_use]
    pub const fn adjacent_months(year: i32, month: u32) -> [(i32, u32); 2] {
        let previous = if month <= 1 {
            (year - 1, 12)
        } else {
            (year, month - 1)
        };
        let next = if month >= 12 {
            (year + 1, 1)
        } else {
            (year, month + 1)
        };
        [previous, next]
    }

    /// Entries dated within the given calendar month.
    pub fn entries_in_month(
        entries: &[EntryImages],
        year: i32,
        month: u32,
    ) -> impl Iterator<Item = &EntryImages> {
        entries
            .iter()
            .filter(move |entry| Self::in_month(entry.date, year, month))
    }

    fn in_month(date: NaiveDate, year: i32, month: u32) -> bool {
        date.year() == year && date.month() == month
    }
}
