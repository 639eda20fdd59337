use rustc_hash::FxHashSet;
use time::{macros::date, Date};

use crate::db::models::{MonthKey, Tier};

/// Smallest value of a ClickHouse `Date` column.
pub const MIN_WAREHOUSE_DATE: Date = date!(1970 - 01 - 01);
/// Largest value of a ClickHouse `Date` column.
pub const MAX_WAREHOUSE_DATE: Date = date!(2149 - 06 - 06);

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PredicateError {
    #[error("{0} delete predicate has no keys")]
    Empty(Tier),
    #[error("duplicate {tier} key {key} in one batch")]
    DuplicateKey { tier: Tier, key: String },
    #[error("month key {0} has no such month")]
    InvalidMonth(String),
    #[error("{tier} key {key} is outside the warehouse date range")]
    OutOfRange { tier: Tier, key: String },
}

/// Validated key set of one replace-window delete.
///
/// Construction is the only way to obtain one, so every statement rendered from
/// it addresses exactly the keys computed this cycle. Keys are kept sorted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletePredicate {
    Daily(Vec<Date>),
    Monthly(Vec<MonthKey>),
}

impl DeletePredicate {
    pub fn daily<I>(dates: I) -> Result<Self, PredicateError>
    where
        I: IntoIterator<Item = Date>,
    {
        let mut seen = FxHashSet::default();
        let mut keys = Vec::new();

        for date in dates {
            if !(MIN_WAREHOUSE_DATE..=MAX_WAREHOUSE_DATE).contains(&date) {
                return Err(PredicateError::OutOfRange {
                    tier: Tier::Daily,
                    key: date.to_string(),
                });
            }
            if !seen.insert(date) {
                return Err(PredicateError::DuplicateKey {
                    tier: Tier::Daily,
                    key: date.to_string(),
                });
            }
            keys.push(date);
        }

        if keys.is_empty() {
            return Err(PredicateError::Empty(Tier::Daily));
        }
        keys.sort();
        Ok(DeletePredicate::Daily(keys))
    }

    pub fn monthly<I>(months: I) -> Result<Self, PredicateError>
    where
        I: IntoIterator<Item = MonthKey>,
    {
        let mut seen = FxHashSet::default();
        let mut keys = Vec::new();

        for key in months {
            let (Some(first), Some(_)) = (key.first_day(), key.next_first_day()) else {
                return Err(PredicateError::InvalidMonth(key.to_string()));
            };
            if !(MIN_WAREHOUSE_DATE..=MAX_WAREHOUSE_DATE).contains(&first) {
                return Err(PredicateError::OutOfRange {
                    tier: Tier::Monthly,
                    key: key.to_string(),
                });
            }
            if !seen.insert(key) {
                return Err(PredicateError::DuplicateKey {
                    tier: Tier::Monthly,
                    key: key.to_string(),
                });
            }
            keys.push(key);
        }

        if keys.is_empty() {
            return Err(PredicateError::Empty(Tier::Monthly));
        }
        keys.sort();
        Ok(DeletePredicate::Monthly(keys))
    }

    pub fn tier(&self) -> Tier {
        match self {
            DeletePredicate::Daily(_) => Tier::Daily,
            DeletePredicate::Monthly(_) => Tier::Monthly,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            DeletePredicate::Daily(keys) => keys.len(),
            DeletePredicate::Monthly(keys) => keys.len(),
        }
    }

    /// Always false for a constructed predicate.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn matches_daily(&self, date: Date) -> bool {
        matches!(self, DeletePredicate::Daily(keys) if keys.binary_search(&date).is_ok())
    }

    pub fn matches_monthly(&self, key: MonthKey) -> bool {
        matches!(self, DeletePredicate::Monthly(keys) if keys.binary_search(&key).is_ok())
    }

    /// Synchronous lightweight-mutation delete for the tier's table.
    pub fn to_sql(&self) -> String {
        let condition = match self {
            DeletePredicate::Daily(dates) => {
                let list: Vec<String> = dates.iter().map(|d| format!("'{}'", d)).collect();
                format!("date IN ({})", list.join(", "))
            },
            DeletePredicate::Monthly(keys) => {
                let list: Vec<String> = keys
                    .iter()
                    .map(|k| format!("({}, {})", k.year, k.month))
                    .collect();
                format!("(year, month) IN ({})", list.join(", "))
            },
        };

        format!(
            "ALTER TABLE {} DELETE WHERE {} SETTINGS mutations_sync = 2",
            self.tier().table(),
            condition
        )
    }
}
