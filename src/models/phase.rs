use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EventError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryPhase {
    Confirmed,
    Preparing,
    Pickup,
    Delivering,
    Delivered,
}

impl DeliveryPhase {
    pub fn key(self) -> &'static str {
        match self {
            DeliveryPhase::Confirmed => "confirmed",
            DeliveryPhase::Preparing => "preparing",
            DeliveryPhase::Pickup => "pickup",
            DeliveryPhase::Delivering => "delivering",
            DeliveryPhase::Delivered => "delivered",
        }
    }

    pub fn label(self) -> &'static str {
        step(self).label
    }

    /// Eta used when a phase change arrives without one.
    pub fn default_eta_minutes(self) -> u32 {
        match self {
            DeliveryPhase::Confirmed | DeliveryPhase::Preparing | DeliveryPhase::Pickup => 25,
            DeliveryPhase::Delivering => 15,
            DeliveryPhase::Delivered => 0,
        }
    }

    pub fn progress_index(self) -> i32 {
        progress_index_of_key(self.key())
    }

    pub fn next(self) -> Option<DeliveryPhase> {
        let index = usize::try_from(self.progress_index()).ok()?;
        PHASE_STEPS.get(index + 1).map(|step| step.phase)
    }
}

impl fmt::Display for DeliveryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for DeliveryPhase {
    type Err = EventError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        PHASE_STEPS
            .iter()
            .find(|step| step.phase.key() == raw)
            .map(|step| step.phase)
            .ok_or_else(|| EventError::UnknownPhase(raw.to_string()))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PhaseStep {
    pub phase: DeliveryPhase,
    pub label: &'static str,
    pub time_hint: &'static str,
}

pub static PHASE_STEPS: [PhaseStep; 5] = [
    PhaseStep {
        phase: DeliveryPhase::Confirmed,
        label: "Order Confirmed",
        time_hint: "2 min ago",
    },
    PhaseStep {
        phase: DeliveryPhase::Preparing,
        label: "Preparing",
        time_hint: "5 min ago",
    },
    PhaseStep {
        phase: DeliveryPhase::Pickup,
        label: "Out for Pickup",
        time_hint: "8 min ago",
    },
    PhaseStep {
        phase: DeliveryPhase::Delivering,
        label: "On the Way",
        time_hint: "Now",
    },
    PhaseStep {
        phase: DeliveryPhase::Delivered,
        label: "Delivered",
        time_hint: "",
    },
];

fn step(phase: DeliveryPhase) -> &'static PhaseStep {
    // every variant has exactly one row
    match phase {
        DeliveryPhase::Confirmed => &PHASE_STEPS[0],
        DeliveryPhase::Preparing => &PHASE_STEPS[1],
        DeliveryPhase::Pickup => &PHASE_STEPS[2],
        DeliveryPhase::Delivering => &PHASE_STEPS[3],
        DeliveryPhase::Delivered => &PHASE_STEPS[4],
    }
}

/// Position of `key` in the canonical phase order, or -1 when the key is not a phase.
pub fn progress_index_of_key(key: &str) -> i32 {
    PHASE_STEPS
        .iter()
        .position(|step| step.phase.key() == key)
        .map_or(-1, |index| index as i32)
}

/// A step is reached once the current phase is at or past it.
pub fn is_active(phase: &str, step_key: &str) -> bool {
    let current = progress_index_of_key(phase);
    let step = progress_index_of_key(step_key);
    step >= 0 && step <= current
}

#[derive(Debug, Clone, Serialize)]
pub struct StepProgress {
    pub key: DeliveryPhase,
    pub label: &'static str,
    pub time_hint: &'static str,
    pub active: bool,
    pub current: bool,
}

pub fn step_progress(phase: DeliveryPhase) -> Vec<StepProgress> {
    PHASE_STEPS
        .iter()
        .map(|step| StepProgress {
            key: step.phase,
            label: step.label,
            time_hint: step.time_hint,
            active: is_active(phase.key(), step.phase.key()),
            current: step.phase == phase,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_index_is_strictly_increasing() {
        let indices: Vec<i32> = PHASE_STEPS
            .iter()
            .map(|step| step.phase.progress_index())
            .collect();

        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert!(indices.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn unknown_key_has_no_progress() {
        assert_eq!(progress_index_of_key("unknown"), -1);
        assert_eq!(progress_index_of_key(""), -1);
        assert!(!is_active("unknown", "confirmed"));
    }

    #[test]
    fn steps_are_cumulative() {
        assert!(is_active("pickup", "confirmed"));
        assert!(is_active("pickup", "preparing"));
        assert!(is_active("pickup", "pickup"));
        assert!(!is_active("pickup", "delivering"));
        assert!(!is_active("pickup", "delivered"));
        assert!(!is_active("delivered", "bogus"));
    }

    #[test]
    fn parses_only_known_phases() {
        assert_eq!("delivering".parse::<DeliveryPhase>().ok(), Some(DeliveryPhase::Delivering));
        assert!("Delivering".parse::<DeliveryPhase>().is_err());
        assert!("unknown".parse::<DeliveryPhase>().is_err());
    }

    #[test]
    fn labels_follow_table() {
        assert_eq!(DeliveryPhase::Pickup.label(), "Out for Pickup");
        assert_eq!(DeliveryPhase::Delivering.label(), "On the Way");
    }

    #[test]
    fn default_eta_by_phase() {
        assert_eq!(DeliveryPhase::Pickup.default_eta_minutes(), 25);
        assert_eq!(DeliveryPhase::Delivering.default_eta_minutes(), 15);
        assert_eq!(DeliveryPhase::Delivered.default_eta_minutes(), 0);
    }

    #[test]
    fn next_walks_the_table() {
        assert_eq!(DeliveryPhase::Pickup.next(), Some(DeliveryPhase::Delivering));
        assert_eq!(DeliveryPhase::Delivered.next(), None);
    }

    #[test]
    fn step_progress_marks_current() {
        let steps = step_progress(DeliveryPhase::Preparing);
        let active: Vec<bool> = steps.iter().map(|s| s.active).collect();
        assert_eq!(active, vec![true, true, false, false, false]);
        assert!(steps[1].current);
        assert!(!steps[0].current);
    }
}
