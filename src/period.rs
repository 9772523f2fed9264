use chrono::NaiveDate;
use std::fmt;

use crate::error_handling::{Result, SpiderError};

/// One calendar month of a target year, the unit of search scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if NaiveDate::from_ymd_opt(year, month, 1).is_none() {
            return Err(SpiderError::Config(format!("Invalid period {}-{}", year, month)));
        }
        Ok(Self { year, month })
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or_default()
    }

    pub fn last_day(&self) -> NaiveDate {
        let (year, month) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        NaiveDate::from_ymd_opt(year, month, 1)
            .and_then(|d| d.pred_opt())
            .unwrap_or_default()
    }

    /// GitHub search qualifier value, e.g. `2019-02-01..2019-02-28`.
    pub fn created_range(&self) -> String {
        format!(
            "{}..{}",
            self.first_day().format("%Y-%m-%d"),
            self.last_day().format("%Y-%m-%d")
        )
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.year, self.month)
    }
}

pub fn months(year: i32) -> impl Iterator<Item = Period> {
    (1..=12).map(move |month| Period { year, month })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covers_twelve_months_in_order() {
        let all: Vec<Period> = months(2019).collect();
        assert_eq!(all.len(), 12);
        assert_eq!(all[0], Period { year: 2019, month: 1 });
        assert_eq!(all[11], Period { year: 2019, month: 12 });
    }

    #[test]
    fn created_range_handles_month_lengths() {
        assert_eq!(Period::new(2019, 2).unwrap().created_range(), "2019-02-01..2019-02-28");
        assert_eq!(Period::new(2020, 2).unwrap().created_range(), "2020-02-01..2020-02-29");
        assert_eq!(Period::new(2019, 12).unwrap().created_range(), "2019-12-01..2019-12-31");
    }

    #[test]
    fn rejects_month_thirteen() {
        assert!(Period::new(2019, 13).is_err());
    }

    #[test]
    fn displays_as_ledger_line() {
        assert_eq!(Period::new(2019, 7).unwrap().to_string(), "2019 7");
    }
}
