//! Step counter behind the registration form's progress indicator.

use serde::Serialize;

pub const STEP_LABELS: [&str; 2] = ["Personal Details", "Donation"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stepper {
    current: usize,
    labels: &'static [&'static str],
}

/// One step as drawn in the progress bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepMarker {
    pub number: usize,
    pub label: &'static str,
    pub active: bool,
    pub completed: bool,
}

impl Default for Stepper {
    fn default() -> Self {
        Self::new(&STEP_LABELS)
    }
}

impl Stepper {
    pub fn new(labels: &'static [&'static str]) -> Self {
        Self { current: 1, labels }
    }

    /// 1-based index of the visible step.
    pub fn current(&self) -> usize {
        self.current
    }

    pub fn count(&self) -> usize {
        self.labels.len()
    }

    pub fn is_last(&self) -> bool {
        self.current >= self.count()
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1).min(self.count().max(1));
    }

    pub fn retreat(&mut self) {
        self.current = self.current.saturating_sub(1).max(1);
    }

    pub fn reset(&mut self) {
        self.current = 1;
    }

    pub fn markers(&self) -> Vec<StepMarker> {
        self.labels
            .iter()
            .copied()
            .enumerate()
            .map(|(index, label)| {
                let number = index + 1;
                StepMarker {
                    number,
                    label,
                    active: number == self.current,
                    completed: number < self.current,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_in_both_directions() {
        let mut stepper = Stepper::default();
        stepper.retreat();
        assert_eq!(stepper.current(), 1);

        stepper.advance();
        stepper.advance();
        stepper.advance();
        assert_eq!(stepper.current(), 2);
        assert!(stepper.is_last());

        stepper.reset();
        assert_eq!(stepper.current(), 1);
    }

    #[test]
    fn markers_track_progress() {
        let mut stepper = Stepper::default();
        stepper.advance();
        let markers = stepper.markers();
        assert_eq!(markers.len(), 2);
        assert!(markers[0].completed && !markers[0].active);
        assert!(markers[1].active && !markers[1].completed);
        assert_eq!(markers[1].label, "Donation");
    }
}
