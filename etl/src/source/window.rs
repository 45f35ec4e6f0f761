use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};

/// A half-open time range `[start, end)` of cashless facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The `days` days leading up to `now`, starting no earlier than the first representable
    /// instant.
    pub fn last_days(now: DateTime<Utc>, days: u32) -> Self {
        let start = now
            .checked_sub_signed(Duration::days(i64::from(days)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        Self::new(start, now)
    }

    /// The whole UTC day `date`.
    pub fn day(date: NaiveDate) -> Self {
        let start = date.and_time(chrono::NaiveTime::MIN).and_utc();

        Self::new(start, start + Duration::days(1))
    }

    /// Splits the window into consecutive windows of `step_days` days, the last one
    /// truncated at `end`. A zero step yields the window itself.
    pub fn split(&self, step_days: u32) -> Vec<DateWindow> {
        if step_days == 0 {
            return vec![*self];
        }

        let step = Duration::days(i64::from(step_days));
        let mut windows = Vec::new();
        let mut current = self.start;
        while current < self.end {
            let next = current
                .checked_add_signed(step)
                .map_or(self.end, |next| next.min(self.end));
            windows.push(Self::new(current, next));
            current = next;
        }

        windows
    }

    /// Start of the window as sent to the API, e.g. `2025-03-10T00:00:00Z`.
    pub fn start_param(&self) -> String {
        self.start.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// End of the window as sent to the API.
    pub fn end_param(&self) -> String {
        self.end.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// Label used in file names: `2024-01-01_to_2024-01-08`.
    pub fn file_label(&self) -> String {
        format!(
            "{}_to_{}",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn day_covers_one_utc_day() {
        let window = DateWindow::day(date(2025, 3, 10));

        assert_eq!(window.start_param(), "2025-03-10T00:00:00Z");
        assert_eq!(window.end_param(), "2025-03-11T00:00:00Z");
    }

    #[test]
    fn last_days_ends_now() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 15, 30, 0).unwrap();

        let window = DateWindow::last_days(now, 7);

        assert_eq!(window.start, Utc.with_ymd_and_hms(2025, 3, 3, 15, 30, 0).unwrap());
        assert_eq!(window.end, now);
    }

    #[test]
    fn split_truncates_the_last_window() {
        let window = DateWindow::new(
            DateWindow::day(date(2024, 1, 1)).start,
            DateWindow::day(date(2024, 1, 17)).start,
        );

        let labels: Vec<_> = window.split(7).iter().map(DateWindow::file_label).collect();

        assert_eq!(
            labels,
            [
                "2024-01-01_to_2024-01-08",
                "2024-01-08_to_2024-01-15",
                "2024-01-15_to_2024-01-17",
            ]
        );
    }

    #[test]
    fn split_of_an_empty_window_is_empty() {
        let start = DateWindow::day(date(2024, 1, 1)).start;

        assert!(DateWindow::new(start, start).split(7).is_empty());
    }

    #[test]
    fn huge_windows_saturate_instead_of_overflowing() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap();

        let window = DateWindow::last_days(now, u32::MAX);
        assert_eq!(window.start, DateTime::<Utc>::MIN_UTC);

        let end = DateTime::<Utc>::MAX_UTC;
        let near_the_end = DateWindow::new(end - Duration::days(3), end);
        assert_eq!(near_the_end.split(u32::MAX), [near_the_end]);
    }
}
