use chrono::{Datelike, NaiveDate};

/// Month at which the date -> season label rolls over to the next year.
/// NCAAM seasons tip off in November, so 2023-11-20 and 2024-03-15 both
/// belong to season 2024.
pub const SEASON_CUTOVER_MONTH: u32 = 11;

/// Season label for a calendar date. Pure and total; every component stamps
/// seasons through this function and nothing downstream recomputes them.
pub fn season_of(date: NaiveDate) -> i32 {
    if date.month() >= SEASON_CUTOVER_MONTH {
        date.year() + 1
    } else {
        date.year()
    }
}
