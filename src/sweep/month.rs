use chrono::{DateTime, Datelike, Local};
use serde::Serialize;
use std::fmt;
use std::time::SystemTime;

/// Calendar month a file belongs to, derived from its modification time in the
/// local time zone. Ordering is chronological.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct EffectiveMonth {
    year: i32,
    month: u32,
}

impl EffectiveMonth {
    pub fn new(year: i32, month: u32) -> Self {
        debug_assert!((1..=12).contains(&month), "month out of range: {month}");
        Self { year, month }
    }

    pub fn from_system_time(time: SystemTime) -> Self {
        let local: DateTime<Local> = time.into();
        Self::new(local.year(), local.month())
    }

    pub fn current() -> Self {
        let now = Local::now();
        Self::new(now.year(), now.month())
    }

    /// `2023-1-archive`: stem shared by every zip container of this month.
    pub fn container_stem(self) -> String {
        format!("{}-{}-archive", self.year, self.month)
    }

    /// `2023-01-archive`: relocate target folder for this month.
    pub fn folder_name(self) -> String {
        format!("{}-{:02}-archive", self.year, self.month)
    }
}

impl fmt::Display for EffectiveMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// True for names produced by [`EffectiveMonth::folder_name`].
pub fn is_month_folder_name(name: &str) -> bool {
    let Some(stem) = name.strip_suffix("-archive") else {
        return false;
    };
    let Some((year, month)) = stem.split_once('-') else {
        return false;
    };
    year.len() == 4
        && month.len() == 2
        && year.bytes().all(|b| b.is_ascii_digit())
        && month
            .parse::<u32>()
            .is_ok_and(|m| (1..=12).contains(&m))
}
