use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Presence state derived from sampled frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceState {
    Idle,
    Active,
}

/// Outcome of one observation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertDecision {
    /// Nothing to do.
    None,
    /// Presence edge inside the cooldown window.
    Suppressed,
    /// Presence edge after the cooldown: create an alert now.
    Emit,
}

/// Serializable view of the state machine.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PresenceSnapshot {
    pub state: PresenceState,
    pub garbage_detected: bool,
    pub last_detection_time: Option<DateTime<Utc>>,
    pub last_alert_time: Option<DateTime<Utc>>,
    pub cooldown_secs: f64,
}

/// Edge-triggered, cooldown-gated alerting.
///
/// Only an absent-to-present transition can produce an alert, and only when
/// strictly more than `cooldown` has passed since the last emitted alert.
/// A presence that stays on never re-alerts; it must drop to absent first.
#[derive(Clone, Debug)]
pub struct AlertStateMachine {
    cooldown: Duration,
    garbage_detected: bool,
    last_detection_time: Option<DateTime<Utc>>,
    last_alert_time: Option<DateTime<Utc>>,
}

impl AlertStateMachine {
    pub fn new(cooldown: std::time::Duration) -> Result<Self> {
        let cooldown = Duration::from_std(cooldown)
            .map_err(|_| anyhow!("alert cooldown is out of range"))?;
        Ok(Self {
            cooldown,
            garbage_detected: false,
            last_detection_time: None,
            last_alert_time: None,
        })
    }

    /// Feed the classification of one sampled frame.
    pub fn observe(&mut self, present: bool, now: DateTime<Utc>) -> AlertDecision {
        if !present {
            self.garbage_detected = false;
            return AlertDecision::None;
        }
        if self.garbage_detected {
            return AlertDecision::None;
        }

        self.garbage_detected = true;
        self.last_detection_time = Some(now);
        if self.cooldown_elapsed(now) {
            self.last_alert_time = Some(now);
            AlertDecision::Emit
        } else {
            AlertDecision::Suppressed
        }
    }

    fn cooldown_elapsed(&self, now: DateTime<Utc>) -> bool {
        match self.last_alert_time {
            None => true,
            Some(last) => now - last > self.cooldown,
        }
    }

    pub fn state(&self) -> PresenceState {
        if self.garbage_detected {
            PresenceState::Active
        } else {
            PresenceState::Idle
        }
    }

    pub fn garbage_detected(&self) -> bool {
        self.garbage_detected
    }

    pub fn last_detection_time(&self) -> Option<DateTime<Utc>> {
        self.last_detection_time
    }

    pub fn last_alert_time(&self) -> Option<DateTime<Utc>> {
        self.last_alert_time
    }

    pub fn snapshot(&self) -> PresenceSnapshot {
        PresenceSnapshot {
            state: self.state(),
            garbage_detected: self.garbage_detected,
            last_detection_time: self.last_detection_time,
            last_alert_time: self.last_alert_time,
            cooldown_secs: self.cooldown.num_milliseconds() as f64 / 1000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn machine(cooldown_secs: u64) -> AlertStateMachine {
        AlertStateMachine::new(std::time::Duration::from_secs(cooldown_secs)).unwrap()
    }

    fn emitted(machine: &mut AlertStateMachine, seq: &[(bool, i64)]) -> usize {
        seq.iter()
            .filter(|(present, at)| machine.observe(*present, t(*at)) == AlertDecision::Emit)
            .count()
    }

    #[test]
    fn sustained_presence_alerts_once() {
        let mut m = machine(100);
        let seq = [(false, 0), (true, 1), (true, 2), (false, 3), (true, 4)];
        assert_eq!(emitted(&mut m, &seq), 1);
        assert!(m.garbage_detected());
        assert_eq!(m.last_detection_time(), Some(t(4)));
        assert_eq!(m.last_alert_time(), Some(t(1)));
    }

    #[test]
    fn edges_inside_cooldown_are_suppressed() {
        let mut m = machine(5);
        let seq = [(true, 0), (false, 1), (true, 3)];
        assert_eq!(emitted(&mut m, &seq), 1);
    }

    #[test]
    fn edges_after_cooldown_alert_again() {
        let mut m = machine(5);
        let seq = [(true, 0), (false, 1), (true, 6)];
        assert_eq!(emitted(&mut m, &seq), 2);
    }

    #[test]
    fn cooldown_boundary_is_strict() {
        let mut m = machine(5);
        assert_eq!(m.observe(true, t(0)), AlertDecision::Emit);
        m.observe(false, t(1));
        assert_eq!(m.observe(true, t(5)), AlertDecision::Suppressed);
        // Suppressed edges do not restart the cooldown.
        m.observe(false, t(5));
        assert_eq!(m.observe(true, t(6)), AlertDecision::Emit);
    }

    #[test]
    fn absent_clears_presence_only() {
        let mut m = machine(15);
        m.observe(true, t(0));
        m.observe(false, t(1));
        assert_eq!(m.state(), PresenceState::Idle);
        assert_eq!(m.last_detection_time(), Some(t(0)));
        assert_eq!(m.last_alert_time(), Some(t(0)));
        assert_eq!(m.snapshot().cooldown_secs, 15.0);
    }
}
