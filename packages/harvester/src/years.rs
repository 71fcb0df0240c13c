//! Publication years.
//!
//! The bureau publishes one snapshot per year starting in 2009; the snapshot
//! for the current year is not considered final, so the newest supported year
//! is always the previous one. "Today" is passed in explicitly.

use std::ops::RangeInclusive;

use chrono::{Datelike, NaiveDate};

use crate::error::{HarvesterError, Result};

/// First year with a published snapshot.
pub const FIRST_YEAR: i32 = 2009;

/// Years available as of `today`.
pub fn supported_years(today: NaiveDate) -> RangeInclusive<i32> {
    FIRST_YEAR..=today.year() - 1
}

/// All supported years, newest first.
pub fn all_years(today: NaiveDate) -> Vec<i32> {
    supported_years(today).rev().collect()
}

/// Check that `year` has a published snapshot as of `today`.
pub fn validate_year(year: i32, today: NaiveDate) -> Result<()> {
    let range = supported_years(today);
    if range.contains(&year) {
        Ok(())
    } else {
        Err(HarvesterError::InvalidYear {
            year,
            first: *range.start(),
            last: *range.end(),
        })
    }
}

/// Resolve the requested years: empty means every supported year.
///
/// Duplicates are dropped, keeping the first occurrence. Each year is
/// validated on its own, so one invalid year does not reject its neighbours.
pub fn resolve_years(requested: &[i32], today: NaiveDate) -> Vec<Result<i32>> {
    if requested.is_empty() {
        return all_years(today).into_iter().map(Ok).collect();
    }

    let mut seen = Vec::with_capacity(requested.len());
    requested
        .iter()
        .filter(|&&year| {
            if seen.contains(&year) {
                false
            } else {
                seen.push(year);
                true
            }
        })
        .map(|&year| validate_year(year, today).map(|()| year))
        .collect()
}
