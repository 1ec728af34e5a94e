use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};

/// Time window during which a scheduled playlist may play.
///
/// Every part is optional. A missing time range covers the whole day; an
/// `end_time` earlier than `start_time` wraps past midnight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleWindow {
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    /// 0 = Sunday .. 6 = Saturday
    pub days_of_week: Option<Vec<u32>>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl ScheduleWindow {
    /// Returns `None` when no constraint is present at all.
    pub fn from_parts(
        start_time: Option<NaiveTime>,
        end_time: Option<NaiveTime>,
        days_of_week: Option<Vec<u32>>,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Option<Self> {
        let days_of_week = days_of_week.filter(|days| !days.is_empty());
        if start_time.is_none()
            && end_time.is_none()
            && days_of_week.is_none()
            && start_date.is_none()
            && end_date.is_none()
        {
            return None;
        }

        Some(Self {
            start_time,
            end_time,
            days_of_week,
            start_date,
            end_date,
        })
    }

    pub fn contains(&self, now: NaiveDateTime) -> bool {
        let date = now.date();
        let time = now.time();

        if let Some(start) = self.start_date {
            if date < start {
                return false;
            }
        }
        if let Some(end) = self.end_date {
            if date > end {
                return false;
            }
        }

        let in_time = match (self.start_time, self.end_time) {
            (Some(start), Some(end)) if start <= end => time >= start && time < end,
            // Overnight: 22:00 - 06:00
            (Some(start), Some(end)) => time >= start || time < end,
            (Some(start), None) => time >= start,
            (None, Some(end)) => time < end,
            (None, None) => true,
        };
        if !in_time {
            return false;
        }

        match &self.days_of_week {
            None => true,
            Some(days) => {
                // After midnight in an overnight window the slot belongs to
                // the previous day.
                let owning_date = match (self.start_time, self.end_time) {
                    (Some(start), Some(end)) if start > end && time < end => {
                        date.pred_opt().unwrap_or(date)
                    }
                    _ => date,
                };
                let weekday = owning_date.weekday().num_days_from_sunday();
                days.contains(&weekday)
            }
        }
    }
}
