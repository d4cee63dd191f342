//! Session state
//!
//! [`OptimizationSession`] owns everything a run produces: the patches and
//! losses, the trial history, the calibration and the status. The status
//! moves through a fixed transition table; anything else is refused.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audio::AudioTake;
use crate::calibration::CalibrationProfile;
use crate::error::StompError;
use crate::patch::{ParameterChange, Patch};

/// Why a search stopped on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceReason {
    /// A full pass over every parameter accepted nothing
    NoImprovementInSweep,
    /// The trial budget is used up
    IterationBudget,
    /// Every step is below its parameter's resolution
    StepsBelowResolution,
}

impl fmt::Display for ConvergenceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConvergenceReason::NoImprovementInSweep => "no improvement in a full sweep",
            ConvergenceReason::IterationBudget => "iteration budget reached",
            ConvergenceReason::StepsBelowResolution => "all steps below device resolution",
        };
        f.write_str(text)
    }
}

/// Error code and message of a fatal failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortReason {
    pub code: String,
    pub message: String,
}

impl AbortReason {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new("CANCELLED", "session cancelled")
    }
}

impl From<&StompError> for AbortReason {
    fn from(err: &StompError) -> Self {
        Self::new(err.error_code(), err.to_string())
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    Calibrating,
    Evaluating,
    Searching,
    Converged { reason: ConvergenceReason },
    Aborted { reason: AbortReason },
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Converged { .. } | SessionStatus::Aborted { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Calibrating => "calibrating",
            SessionStatus::Evaluating => "evaluating",
            SessionStatus::Searching => "searching",
            SessionStatus::Converged { .. } => "converged",
            SessionStatus::Aborted { .. } => "aborted",
        }
    }

    /// Whether the transition table allows moving to `next`
    pub fn can_transition_to(&self, next: &SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (Converged { .. } | Aborted { .. }, _) => false,
            (_, Aborted { .. }) => true,
            (Idle, Calibrating) => true,
            (Calibrating, Evaluating) => true,
            (Evaluating, Searching) => true,
            (Searching, Converged { .. }) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Converged { reason } => write!(f, "converged ({})", reason),
            SessionStatus::Aborted { reason } => write!(f, "aborted ({})", reason),
            other => f.write_str(other.name()),
        }
    }
}

/// Sign of a trial step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Increase,
    Decrease,
}

impl Direction {
    pub fn sign(self) -> f64 {
        match self {
            Direction::Increase => 1.0,
            Direction::Decrease => -1.0,
        }
    }

    pub fn symbol(self) -> char {
        match self {
            Direction::Increase => '+',
            Direction::Decrease => '-',
        }
    }
}

/// One measured (or unmeasurable) candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationTrial {
    pub index: usize,
    pub patch: Patch,
    /// `None` when the measurement failed and the trial was discarded
    pub loss: Option<f64>,
    pub parameter_changed: String,
    pub direction: Direction,
    pub value: f64,
    pub accepted: bool,
    pub timestamp: DateTime<Utc>,
}

/// Shared stop flag checked between trials
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything one optimization run owns
#[derive(Debug, Clone)]
pub struct OptimizationSession {
    id: Uuid,
    initial_patch: Patch,
    initial_loss: Option<f64>,
    best_patch: Patch,
    best_loss: Option<f64>,
    trials: Vec<OptimizationTrial>,
    calibration: Option<CalibrationProfile>,
    status: SessionStatus,
    initial_take: Option<AudioTake>,
    best_take: Option<AudioTake>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl OptimizationSession {
    pub fn new(initial_patch: Patch) -> Self {
        Self {
            id: Uuid::new_v4(),
            best_patch: initial_patch.clone(),
            initial_patch,
            initial_loss: None,
            best_loss: None,
            trials: Vec::new(),
            calibration: None,
            status: SessionStatus::Idle,
            initial_take: None,
            best_take: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn initial_patch(&self) -> &Patch {
        &self.initial_patch
    }

    pub fn initial_loss(&self) -> Option<f64> {
        self.initial_loss
    }

    pub fn best_patch(&self) -> &Patch {
        &self.best_patch
    }

    pub fn best_loss(&self) -> Option<f64> {
        self.best_loss
    }

    pub fn trials(&self) -> &[OptimizationTrial] {
        &self.trials
    }

    pub fn calibration(&self) -> Option<&CalibrationProfile> {
        self.calibration.as_ref()
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn initial_take(&self) -> Option<&AudioTake> {
        self.initial_take.as_ref()
    }

    pub fn best_take(&self) -> Option<&AudioTake> {
        self.best_take.as_ref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn iterations(&self) -> usize {
        self.trials.len()
    }

    pub fn accepted_count(&self) -> usize {
        self.trials.iter().filter(|t| t.accepted).count()
    }

    /// `initial_loss - best_loss`
    pub fn improvement(&self) -> Option<f64> {
        Some(self.initial_loss? - self.best_loss?)
    }

    /// Parameters the search moved away from the initial patch
    pub fn changed_parameters(&self) -> Vec<ParameterChange> {
        self.initial_patch.numeric_changes(&self.best_patch)
    }

    /// Move to `next` if the transition table allows it
    ///
    /// Returns `false` and leaves the status untouched otherwise.
    pub fn transition(&mut self, next: SessionStatus) -> bool {
        if !self.status.can_transition_to(&next) {
            log::warn!("Refused session transition {} -> {}", self.status, next);
            return false;
        }
        log::info!("Session {}: {} -> {}", self.id, self.status, next);
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        self.status = next;
        true
    }

    pub(crate) fn set_calibration(&mut self, profile: CalibrationProfile) {
        self.calibration = Some(profile);
    }

    /// Record the initial measurement; it becomes the first best
    pub fn record_initial(&mut self, loss: f64, take: AudioTake) {
        self.initial_loss = Some(loss);
        self.best_loss = Some(loss);
        self.initial_take = Some(take.clone());
        self.best_take = Some(take);
    }

    /// Replace the best patch if `loss` is strictly lower
    pub(crate) fn improve(&mut self, patch: Patch, loss: f64) -> bool {
        match self.best_loss {
            Some(best) if loss >= best => false,
            _ => {
                self.best_patch = patch;
                self.best_loss = Some(loss);
                true
            }
        }
    }

    pub(crate) fn set_best_take(&mut self, take: AudioTake) {
        self.best_take = Some(take);
    }

    /// Append a trial, numbering it after the existing history
    pub(crate) fn push_trial(&mut self, mut trial: OptimizationTrial) {
        trial.index = self.trials.len();
        self.trials.push(trial);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::SectionId;
    use test_case::test_case;

    fn converged() -> SessionStatus {
        SessionStatus::Converged {
            reason: ConvergenceReason::IterationBudget,
        }
    }

    fn aborted() -> SessionStatus {
        SessionStatus::Aborted {
            reason: AbortReason::cancelled(),
        }
    }

    #[test_case(SessionStatus::Idle, SessionStatus::Calibrating, true ; "idle to calibrating")]
    #[test_case(SessionStatus::Idle, SessionStatus::Searching, false ; "idle cannot skip ahead")]
    #[test_case(SessionStatus::Calibrating, SessionStatus::Evaluating, true ; "calibrating to evaluating")]
    #[test_case(SessionStatus::Evaluating, SessionStatus::Searching, true ; "evaluating to searching")]
    #[test_case(SessionStatus::Evaluating, converged(), false ; "evaluating cannot converge")]
    #[test_case(SessionStatus::Searching, converged(), true ; "searching to converged")]
    #[test_case(SessionStatus::Searching, SessionStatus::Calibrating, false ; "no going back")]
    #[test_case(SessionStatus::Idle, aborted(), true ; "idle can abort")]
    #[test_case(SessionStatus::Searching, aborted(), true ; "searching can abort")]
    #[test_case(converged(), aborted(), false ; "converged is terminal")]
    #[test_case(aborted(), SessionStatus::Idle, false ; "aborted is terminal")]
    fn test_transition_table(from: SessionStatus, to: SessionStatus, allowed: bool) {
        assert_eq!(from.can_transition_to(&to), allowed);
    }

    #[test]
    fn test_refused_transition_keeps_status() {
        let mut session = OptimizationSession::new(Patch::new("p"));
        assert!(!session.transition(SessionStatus::Searching));
        assert_eq!(session.status(), &SessionStatus::Idle);
        assert!(session.transition(SessionStatus::Calibrating));
        assert!(session.transition(aborted()));
        assert!(session.finished_at().is_some());
    }

    #[test]
    fn test_best_loss_only_decreases() {
        let patch = Patch::new("p").with_number(SectionId::Amp, "gain", 0.5);
        let mut session = OptimizationSession::new(patch.clone());
        session.record_initial(2.0, AudioTake::from_mono(vec![0.0; 10], 44100));

        let better = patch.with_number(SectionId::Amp, "gain", 0.6);
        assert!(!session.improve(better.clone(), 2.0));
        assert!(session.improve(better.clone(), 1.5));
        assert!(!session.improve(patch, 1.7));
        assert_eq!(session.best_loss(), Some(1.5));
        assert_eq!(session.best_patch(), &better);
        assert_eq!(session.improvement(), Some(0.5));
        assert_eq!(session.changed_parameters().len(), 1);
    }

    #[test]
    fn test_cancellation_is_shared() {
        let token = CancellationToken::new();
        let observer = token.clone();
        assert!(!observer.is_cancelled());
        token.cancel();
        assert!(observer.is_cancelled());
    }

    #[test]
    fn test_status_serializes_with_reason() {
        let json = serde_json::to_string(&converged()).unwrap();
        assert_eq!(json, r#"{"state":"converged","reason":"iteration_budget"}"#);
    }
}
