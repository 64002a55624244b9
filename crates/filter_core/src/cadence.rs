use std::time::Duration;

/// Timer settings for startup probing and scroll-aware polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollIntervals {
    pub startup_check: Duration,
    pub startup_max_attempts: u32,
    pub scroll_active: Duration,
    pub scroll_idle: Duration,
    pub scroll_quiet_period: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            startup_check: Duration::from_millis(50),
            startup_max_attempts: 50,
            scroll_active: Duration::from_millis(100),
            scroll_idle: Duration::from_millis(2000),
            scroll_quiet_period: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScrollActivity {
    #[default]
    Idle,
    Active,
}

/// Two-state machine deciding the polling interval.
///
/// A scroll event flips to `Active`; the quiet timer owned by the caller flips
/// back to `Idle`. Both transitions report whether the interval changed so the
/// poll task only restarts its wait when needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollCadence {
    activity: ScrollActivity,
    intervals: PollIntervals,
}

impl PollCadence {
    pub fn new(intervals: PollIntervals) -> Self {
        Self {
            activity: ScrollActivity::Idle,
            intervals,
        }
    }

    pub fn activity(&self) -> ScrollActivity {
        self.activity
    }

    pub fn intervals(&self) -> &PollIntervals {
        &self.intervals
    }

    pub fn interval(&self) -> Duration {
        match self.activity {
            ScrollActivity::Active => self.intervals.scroll_active,
            ScrollActivity::Idle => self.intervals.scroll_idle,
        }
    }

    pub fn quiet_period(&self) -> Duration {
        self.intervals.scroll_quiet_period
    }

    pub fn on_scroll(&mut self) -> bool {
        self.transition(ScrollActivity::Active)
    }

    pub fn on_quiet(&mut self) -> bool {
        self.transition(ScrollActivity::Idle)
    }

    pub fn reset(&mut self) {
        self.activity = ScrollActivity::Idle;
    }

    fn transition(&mut self, next: ScrollActivity) -> bool {
        let changed = self.activity != next;
        self.activity = next;
        changed
    }
}
