//! Slideshow progress.

use serde::{Deserialize, Serialize};

/// Position within a slideshow and the furthest slide completed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlideshowState {
    /// Slide being shown
    pub step: usize,

    /// Furthest slide ever completed
    pub max_step_completed: usize,
}

impl SlideshowState {
    /// Show slide `step`, clamped to `length - 1`.
    pub fn go_to(&mut self, step: usize, length: usize) {
        self.step = step.min(length.saturating_sub(1));
        self.max_step_completed = self.max_step_completed.max(self.step);
    }

    /// Show the next slide, if any. Returns whether the slide changed.
    pub fn next(&mut self, length: usize) -> bool {
        let before = self.step;
        self.go_to(self.step + 1, length);
        self.step != before
    }

    /// Show the previous slide, if any. Returns whether the slide changed.
    pub fn previous(&mut self) -> bool {
        if self.step == 0 {
            return false;
        }
        self.step -= 1;
        true
    }

    /// Whether every slide has been seen.
    pub fn finished(&self, length: usize) -> bool {
        length > 0 && self.max_step_completed + 1 >= length
    }
}
