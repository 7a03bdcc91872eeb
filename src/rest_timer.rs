use serde::{Deserialize, Serialize};

/// Parse a template row's free-text rest field into seconds.
///
/// `"2:30"` is minutes:seconds, `"2m"`/`"2 min"`/`"2 mins"` are minutes,
/// `"90s"` is seconds. A bare number means minutes unless that would reach an
/// hour, in which case it was meant as seconds (`"90"` is 90s, `"3"` is 180s).
/// Anything unparseable or non-positive yields 0, meaning no timer.
pub fn parse_rest_seconds(raw: &str) -> u32 {
    let text = raw.trim().to_ascii_lowercase();
    if text.is_empty() {
        return 0;
    }

    let seconds = if let Some((mins, secs)) = text.split_once(':') {
        match (leading_number(mins), leading_number(secs)) {
            (Some(m), Some(s)) => m * 60.0 + s,
            (Some(m), None) => m * 60.0,
            (None, Some(s)) if mins.trim().is_empty() => s,
            _ => 0.0,
        }
    } else if let Some(num) = strip_minute_unit(&text) {
        leading_number(num).map(|m| m * 60.0).unwrap_or(0.0)
    } else if text.ends_with('s') {
        leading_number(&text).unwrap_or(0.0)
    } else {
        match leading_number(&text) {
            Some(n) if n * 60.0 >= 3600.0 => n,
            Some(n) => n * 60.0,
            None => 0.0,
        }
    };

    if seconds.is_finite() && seconds > 0.0 {
        seconds.round() as u32
    } else {
        0
    }
}

fn strip_minute_unit(text: &str) -> Option<&str> {
    ["mins", "min", "m"]
        .iter()
        .find_map(|unit| text.strip_suffix(unit))
}

/// Leading decimal number, ignoring whatever follows it ("1.5 min" -> 1.5).
fn leading_number(text: &str) -> Option<f64> {
    let text = text.trim();
    let mut end = 0;
    let mut seen_dot = false;
    for (i, c) in text.char_indices() {
        if c.is_ascii_digit() || (c == '-' && i == 0) {
            end = i + c.len_utf8();
        } else if c == '.' && !seen_dot {
            seen_dot = true;
            end = i + 1;
        } else {
            break;
        }
    }
    text[..end].parse::<f64>().ok()
}

/// A running countdown. Remaining time is always recomputed from the deadline,
/// so a suspended tab or a reload never makes it drift.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct RestTimer {
    pub total_seconds: u32,
    pub remaining_seconds: u32,
    /// Epoch milliseconds.
    pub deadline_ms: i64,
}

impl RestTimer {
    pub fn start(duration_seconds: u32, now_ms: i64) -> Option<Self> {
        if duration_seconds == 0 {
            return None;
        }
        Some(Self {
            total_seconds: duration_seconds,
            remaining_seconds: duration_seconds,
            deadline_ms: now_ms + duration_seconds as i64 * 1000,
        })
    }

    pub fn remaining_at(&self, now_ms: i64) -> u32 {
        let left_ms = self.deadline_ms - now_ms;
        if left_ms <= 0 {
            0
        } else {
            ((left_ms + 999) / 1000) as u32
        }
    }

    /// Rebuild a timer from a saved copy. A deadline already in the past gives `None`.
    pub fn resume_from_saved(saved: &RestTimer, now_ms: i64) -> Option<Self> {
        let remaining = saved.remaining_at(now_ms);
        if remaining == 0 {
            return None;
        }
        Some(Self {
            total_seconds: saved.total_seconds.max(remaining),
            remaining_seconds: remaining,
            deadline_ms: saved.deadline_ms,
        })
    }
}

/// Holds at most one rest timer. While it holds one, logging is blocked.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RestSlot {
    active: Option<RestTimer>,
}

impl RestSlot {
    /// Replace any running timer. A zero duration starts nothing and leaves
    /// a running timer alone.
    pub fn start(&mut self, duration_seconds: u32, now_ms: i64) -> bool {
        let Some(timer) = RestTimer::start(duration_seconds, now_ms) else {
            return false;
        };
        self.active = Some(timer);
        true
    }

    /// Recompute remaining time; clears the slot once it reaches zero.
    /// Returns the remaining seconds, or `None` when nothing is running.
    pub fn tick(&mut self, now_ms: i64) -> Option<u32> {
        let timer = self.active.as_mut()?;
        timer.remaining_seconds = timer.remaining_at(now_ms);
        if timer.remaining_seconds == 0 {
            self.active = None;
            return Some(0);
        }
        Some(timer.remaining_seconds)
    }

    pub fn resume(&mut self, saved: &RestTimer, now_ms: i64) -> bool {
        self.active = RestTimer::resume_from_saved(saved, now_ms);
        self.active.is_some()
    }

    /// Returns whether a timer was actually cancelled.
    pub fn clear(&mut self) -> bool {
        self.active.take().is_some()
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    pub fn current(&self) -> Option<RestTimer> {
        self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rest_formats() {
        assert_eq!(parse_rest_seconds("90s"), 90);
        assert_eq!(parse_rest_seconds("2:30"), 150);
        assert_eq!(parse_rest_seconds("0:45"), 45);
        assert_eq!(parse_rest_seconds("3"), 180);
        assert_eq!(parse_rest_seconds("90"), 90);
        assert_eq!(parse_rest_seconds("60"), 60);
        assert_eq!(parse_rest_seconds("59"), 3540);
        assert_eq!(parse_rest_seconds("2m"), 120);
        assert_eq!(parse_rest_seconds("2 min"), 120);
        assert_eq!(parse_rest_seconds("1.5 mins"), 90);
        assert_eq!(parse_rest_seconds(" 45 S "), 45);
    }

    #[test]
    fn unparseable_rest_means_no_timer() {
        assert_eq!(parse_rest_seconds(""), 0);
        assert_eq!(parse_rest_seconds("rest well"), 0);
        assert_eq!(parse_rest_seconds("-2"), 0);
        assert_eq!(parse_rest_seconds("0s"), 0);
        assert_eq!(parse_rest_seconds("0:00"), 0);
    }

    #[test]
    fn zero_duration_does_not_start() {
        let mut slot = RestSlot::default();
        assert!(!slot.start(0, 1_000));
        assert!(!slot.is_running());
    }

    #[test]
    fn zero_duration_keeps_a_running_timer() {
        let mut slot = RestSlot::default();
        assert!(slot.start(90, 0));
        assert!(!slot.start(0, 10_000));
        assert!(slot.is_running());
        assert_eq!(slot.tick(10_000), Some(80));
    }

    #[test]
    fn tick_counts_down_from_deadline_and_clears() {
        let mut slot = RestSlot::default();
        assert!(slot.start(3, 0));
        assert_eq!(slot.tick(500), Some(3));
        assert_eq!(slot.tick(1_000), Some(2));
        assert_eq!(slot.tick(2_999), Some(1));
        assert_eq!(slot.tick(3_000), Some(0));
        assert!(!slot.is_running());
        assert_eq!(slot.tick(3_500), None);
    }

    #[test]
    fn starting_again_replaces_previous_timer() {
        let mut slot = RestSlot::default();
        slot.start(60, 0);
        slot.start(10, 5_000);
        assert_eq!(slot.current().map(|t| t.deadline_ms), Some(15_000));
    }

    #[test]
    fn saved_timer_resumes_after_reload() {
        let t0 = 1_700_000_000_000;
        let timer = RestTimer::start(120, t0).unwrap();
        let json = serde_json::to_string(&timer).unwrap();
        let saved: RestTimer = serde_json::from_str(&json).unwrap();

        let mut slot = RestSlot::default();
        assert!(slot.resume(&saved, t0 + 50_000));
        let remaining = slot.current().unwrap().remaining_seconds;
        assert!((69..=71).contains(&remaining), "remaining = {}", remaining);
        assert_eq!(slot.current().unwrap().total_seconds, 120);
    }

    #[test]
    fn expired_saved_timer_is_cleared() {
        let timer = RestTimer::start(30, 0).unwrap();
        let mut slot = RestSlot::default();
        slot.start(10, 0);
        assert!(!slot.resume(&timer, 31_000));
        assert!(!slot.is_running());
    }

    #[test]
    fn skip_cancels_immediately() {
        let mut slot = RestSlot::default();
        slot.start(90, 0);
        assert!(slot.clear());
        assert!(!slot.clear());
        assert!(!slot.is_running());
    }
}
