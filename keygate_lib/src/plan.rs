use std::fmt;

use crate::keygate_error::KeygateError;

const DAY: u64 = 86400;

/// Validity period a token is issued for.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Plan {
    OneDay,
    ThreeDays,
    OneWeek,
    TwoWeeks,
    ThreeWeeks,
    SixWeeks,
    OneMonth,
    TwoMonths,
    ThreeMonths,
    SixMonths,
    NineMonths,
    OneYear,
    TwoYears,
    Infinite,
}

impl Plan {
    /// Every plan, in the order they are advertised to clients.
    pub const ALL: [Plan; 14] = [
        Plan::OneDay,
        Plan::ThreeDays,
        Plan::OneWeek,
        Plan::TwoWeeks,
        Plan::ThreeWeeks,
        Plan::SixWeeks,
        Plan::OneMonth,
        Plan::TwoMonths,
        Plan::ThreeMonths,
        Plan::SixMonths,
        Plan::NineMonths,
        Plan::OneYear,
        Plan::TwoYears,
        Plan::Infinite,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::OneDay => "1d",
            Plan::ThreeDays => "3d",
            Plan::OneWeek => "1w",
            Plan::TwoWeeks => "2w",
            Plan::ThreeWeeks => "3w",
            Plan::SixWeeks => "6w",
            Plan::OneMonth => "1m",
            Plan::TwoMonths => "2m",
            Plan::ThreeMonths => "3m",
            Plan::SixMonths => "6m",
            Plan::NineMonths => "9m",
            Plan::OneYear => "1y",
            Plan::TwoYears => "2y",
            Plan::Infinite => "infinite",
        }
    }

    /// Months are 30 days and years 365 days.
    pub fn duration_secs(&self) -> Option<u64> {
        let days = match self {
            Plan::OneDay => 1,
            Plan::ThreeDays => 3,
            Plan::OneWeek => 7,
            Plan::TwoWeeks => 14,
            Plan::ThreeWeeks => 21,
            Plan::SixWeeks => 42,
            Plan::OneMonth => 30,
            Plan::TwoMonths => 60,
            Plan::ThreeMonths => 90,
            Plan::SixMonths => 180,
            Plan::NineMonths => 270,
            Plan::OneYear => 365,
            Plan::TwoYears => 730,
            Plan::Infinite => return None,
        };
        Some(days * DAY)
    }

    pub fn expires_at(&self, now: f64) -> Option<f64> {
        self.duration_secs().map(|secs| now + secs as f64)
    }

    /// Case-insensitive lookup by name.
    pub fn parse(plan: &str) -> Result<Plan, KeygateError> {
        let plan = plan.to_lowercase();
        Plan::ALL
            .iter()
            .find(|candidate| candidate.as_str() == plan)
            .copied()
            .ok_or_else(|| KeygateError::InvalidPlan {
                valid_plans: Plan::valid_plans(),
            })
    }

    pub fn valid_plans() -> String {
        Plan::ALL
            .iter()
            .map(Plan::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ignores_case() {
        assert_eq!(Plan::parse("1D").unwrap(), Plan::OneDay);
        assert_eq!(Plan::parse("Infinite").unwrap(), Plan::Infinite);
        assert_eq!(Plan::parse("6w").unwrap(), Plan::SixWeeks);
    }

    #[test]
    fn unknown_plan_lists_valid_plans() {
        let err = Plan::parse("5d").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid plan. Valid plans: 1d, 3d, 1w, 2w, 3w, 6w, 1m, 2m, 3m, 6m, 9m, 1y, 2y, infinite"
        );
    }

    #[test]
    fn durations() {
        assert_eq!(Plan::OneDay.duration_secs(), Some(86400));
        assert_eq!(Plan::OneMonth.duration_secs(), Some(30 * 86400));
        assert_eq!(Plan::TwoYears.duration_secs(), Some(730 * 86400));
        assert_eq!(Plan::Infinite.duration_secs(), None);
        assert_eq!(Plan::OneWeek.expires_at(100.0), Some(100.0 + 7.0 * 86400.0));
        assert_eq!(Plan::Infinite.expires_at(100.0), None);
    }
}
