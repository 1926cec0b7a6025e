//! Slideshow stages: the story intro and the distance introduction.
//!
//! A slideshow has two markers. It sits on `slides` while the student
//! pages through, and moves to `finished` once every slide has been seen
//! and every question slide answered.

use std::sync::Arc;

use datastory_core::{MultipleChoiceResponse, SessionContext, SlideshowState, StageState};
use datastory_progress::{GateError, GateTable, StageStateMachine};
use datastory_storage::StageStore;
use datastory_work::{AutoAdvanceRule, ControllerConfig, StageStateController};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

datastory_core::markers! {
    /// Checkpoints of a slideshow stage.
    pub enum SlideshowMarker {
        Slides = "slides",
        Finished = "finished",
    }
}

/// Shape of one slideshow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlideshowSpec {
    /// Persistence key suffix
    pub stage_id: &'static str,
    /// Number of slides
    pub length: usize,
    /// Slides that hold a question, with its tag. The student cannot page
    /// past them before answering.
    pub questions: &'static [(usize, &'static str)],
}

/// The story intro.
pub const INTRO: SlideshowSpec = SlideshowSpec {
    stage_id: "intro",
    length: 8,
    questions: &[],
};

/// The distance introduction.
pub const DISTANCE_INTRODUCTION: SlideshowSpec = SlideshowSpec {
    stage_id: "distance_introduction",
    length: 13,
    questions: &[(7, "which-galaxy-closer"), (9, "how-much-closer-galaxies")],
};

impl SlideshowSpec {
    fn question_at(&self, step: usize) -> Option<&'static str> {
        self.questions
            .iter()
            .find(|(at, _)| *at == step)
            .map(|(_, tag)| *tag)
    }

    fn complete(&self, state: &State) -> bool {
        state.fields.slideshow.finished(self.length)
            && self.questions.iter().all(|(_, tag)| state.question_completed(tag))
    }
}

/// Stage-specific fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlideshowFields {
    /// Slide position
    pub slideshow: SlideshowState,
}

type State = StageState<SlideshowMarker, SlideshowFields>;

/// Gates of a slideshow.
pub fn gates(
    spec: SlideshowSpec,
) -> std::result::Result<GateTable<SlideshowMarker, SlideshowFields>, GateError> {
    GateTable::new().with_gate(
        SlideshowMarker::Slides,
        SlideshowMarker::Finished,
        "all_slides_seen",
        move |s: &State| spec.complete(s),
    )
}

/// A mounted slideshow stage.
pub struct SlideshowStage {
    controller: StageStateController<SlideshowMarker, SlideshowFields>,
    spec: SlideshowSpec,
}

impl SlideshowStage {
    /// Load the slideshow for `context`.
    pub async fn mount(
        context: SessionContext,
        store: Arc<dyn StageStore>,
        config: ControllerConfig,
        spec: SlideshowSpec,
    ) -> Result<Self> {
        let machine = StageStateMachine::new(State::new(spec.stage_id), gates(spec)?);
        let mut controller = StageStateController::new(context, machine, store, config);
        controller.add_rule(AutoAdvanceRule::new(
            "slideshow_finished",
            SlideshowMarker::Slides,
            SlideshowMarker::Finished,
            move |s: &State| spec.complete(s),
        ));
        controller.load().await;
        Ok(Self { controller, spec })
    }

    /// Flush the pending write.
    pub async fn unmount(self) -> Result<()> {
        self.controller.unmount().await?;
        Ok(())
    }

    /// The stage's state machine.
    pub fn machine(&self) -> &StageStateMachine<SlideshowMarker, SlideshowFields> {
        self.controller.machine()
    }

    /// Slide position.
    pub fn slideshow(&self) -> SlideshowState {
        self.machine().with_fields(|f| f.slideshow)
    }

    /// Slideshow shape.
    pub fn spec(&self) -> SlideshowSpec {
        self.spec
    }

    /// Whether every slide was seen and every question answered.
    pub fn is_finished(&self) -> bool {
        self.machine().is_current(SlideshowMarker::Finished)
    }

    /// Show the next slide. Refused on an unanswered question slide.
    pub fn next(&self) -> bool {
        let step = self.slideshow().step;
        if let Some(tag) = self.spec.question_at(step) {
            if !self.machine().with_state(|s| s.question_completed(tag)) {
                debug!(stage = self.spec.stage_id, step, tag, "Question slide not answered yet");
                return false;
            }
        }
        let length = self.spec.length;
        let mut moved = false;
        self.machine().update_fields(|f| moved = f.slideshow.next(length));
        moved
    }

    /// Show the previous slide.
    pub fn previous(&self) -> bool {
        let mut moved = false;
        self.machine().update_fields(|f| moved = f.slideshow.previous());
        moved
    }

    /// Jump back to a slide already reached.
    pub fn go_to(&self, step: usize) -> bool {
        let slideshow = self.slideshow();
        if step > slideshow.max_step_completed || step == slideshow.step {
            return false;
        }
        let length = self.spec.length;
        self.machine()
            .update_fields(|f| f.slideshow.go_to(step, length))
    }

    /// Record an answer on a question slide.
    pub fn answer(
        &self,
        tag: &str,
        choice: usize,
        correct: bool,
        score: u32,
    ) -> MultipleChoiceResponse {
        self.machine().record_multiple_choice(tag, choice, correct, score)
    }
}
