//! Coordinate search
//!
//! One parameter at a time: a round tries `value + step` and `value - step`,
//! then keeps the better of the two if it beats the best loss so far. An
//! accepted round stays on the same parameter with the same step; a round
//! that improves nothing shrinks that parameter's step and moves on.
//!
//! The optimizer never touches hardware. The caller measures each
//! [`Proposal`] and reports back through [`CoordinateSearchOptimizer::accept`]
//! or [`CoordinateSearchOptimizer::discard`].

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::config::SearchConfig;
use crate::optimize::space::{ParameterSpace, ParameterSpec};
use crate::patch::Patch;
use crate::session::state::{ConvergenceReason, Direction, OptimizationSession, OptimizationTrial};

/// Next thing to put on the device
#[derive(Debug, Clone, PartialEq)]
pub enum Proposal {
    /// Measure this candidate
    Trial {
        patch: Patch,
        parameter: usize,
        name: String,
        direction: Direction,
        value: f64,
    },
    /// Restore the best patch after a divergent trial; not measured
    Revert(Patch),
}

impl Proposal {
    pub fn patch(&self) -> &Patch {
        match self {
            Proposal::Trial { patch, .. } => patch,
            Proposal::Revert(patch) => patch,
        }
    }

    pub fn is_revert(&self) -> bool {
        matches!(self, Proposal::Revert(_))
    }
}

/// Candidate waiting to be proposed
#[derive(Debug, Clone)]
struct Candidate {
    direction: Direction,
    value: f64,
    patch: Patch,
}

/// Candidate with its outcome
#[derive(Debug, Clone)]
struct Outcome {
    candidate: Candidate,
    loss: Option<f64>,
    timestamp: DateTime<Utc>,
}

pub struct CoordinateSearchOptimizer {
    space: ParameterSpace,
    config: SearchConfig,
    steps: Vec<f64>,
    current: usize,
    /// Parameter whose visit `tried` belongs to
    visiting: Option<usize>,
    /// Values already measured during the current visit, base included
    tried: Vec<f64>,
    queue: VecDeque<Candidate>,
    outcomes: Vec<Outcome>,
    trials_used: usize,
    accepted_in_sweep: bool,
    revert_pending: bool,
    finished: Option<ConvergenceReason>,
}

impl CoordinateSearchOptimizer {
    pub fn new(space: ParameterSpace, config: SearchConfig) -> Self {
        let steps = space.specs().iter().map(|s| s.initial_step).collect();
        Self {
            space,
            config,
            steps,
            current: 0,
            visiting: None,
            tried: Vec::new(),
            queue: VecDeque::new(),
            outcomes: Vec::new(),
            trials_used: 0,
            accepted_in_sweep: false,
            revert_pending: false,
            finished: None,
        }
    }

    pub fn space(&self) -> &ParameterSpace {
        &self.space
    }

    /// Current step of every parameter, in space order
    pub fn steps(&self) -> &[f64] {
        &self.steps
    }

    pub fn step(&self, name: &str) -> Option<f64> {
        self.space.index_of(name).map(|i| self.steps[i])
    }

    pub fn current_parameter(&self) -> Option<&ParameterSpec> {
        self.space.specs().get(self.current)
    }

    pub fn trials_used(&self) -> usize {
        self.trials_used
    }

    /// Why the search stopped, once it has
    pub fn finished(&self) -> Option<ConvergenceReason> {
        self.finished
    }

    fn finish(&mut self, reason: ConvergenceReason) {
        if self.finished.is_none() {
            log::info!("Search finished after {} trials: {}", self.trials_used, reason);
            self.finished = Some(reason);
        }
    }

    fn tolerance(spec: &ParameterSpec) -> f64 {
        1e-9 * (spec.max - spec.min).abs().max(1.0)
    }

    fn was_tried(&self, spec: &ParameterSpec, value: f64) -> bool {
        let tol = Self::tolerance(spec);
        self.tried.iter().any(|t| (t - value).abs() <= tol)
    }

    fn below_floor(&self, index: usize) -> bool {
        self.steps[index] < self.space.specs()[index].min_step()
    }

    /// Shrink the current parameter's step and move to the next one
    fn advance(&mut self) {
        let spec = &self.space.specs()[self.current];
        self.steps[self.current] *= spec.step_decay;
        log::debug!(
            "{}: no improvement, step now {:.5}",
            spec.name,
            self.steps[self.current]
        );
        self.skip();
    }

    /// Move to the next parameter without touching its step
    fn skip(&mut self) {
        self.visiting = None;
        self.tried.clear();
        self.current += 1;
        if self.current >= self.space.len() {
            self.current = 0;
            if !self.accepted_in_sweep {
                self.finish(ConvergenceReason::NoImprovementInSweep);
            }
            self.accepted_in_sweep = false;
        }
    }

    /// Fill the queue with the next round's candidates
    ///
    /// Returns `false` once the search is over.
    fn plan_round(&mut self, session: &OptimizationSession) -> bool {
        loop {
            if self.finished.is_some() {
                return false;
            }
            if self.space.is_empty() || (0..self.space.len()).all(|i| self.below_floor(i)) {
                self.finish(ConvergenceReason::StepsBelowResolution);
                return false;
            }
            if self.trials_used >= self.config.max_iterations {
                self.finish(ConvergenceReason::IterationBudget);
                return false;
            }
            if self.below_floor(self.current) {
                self.skip();
                continue;
            }

            let spec = self.space.specs()[self.current].clone();
            let best = session.best_patch();
            let base = spec
                .resolve(best)
                .unwrap_or_else(|_| spec.clamp(spec.default.unwrap_or(spec.min)));
            if self.visiting != Some(self.current) {
                self.visiting = Some(self.current);
                self.tried.clear();
                self.tried.push(base);
            }

            let step = self.steps[self.current];
            let tol = Self::tolerance(&spec);
            for direction in [Direction::Increase, Direction::Decrease] {
                let value = spec.clamp(base + direction.sign() * step);
                if (value - base).abs() <= tol || self.was_tried(&spec, value) {
                    continue;
                }
                if self.queue.iter().any(|c| (c.value - value).abs() <= tol) {
                    continue;
                }
                self.queue.push_back(Candidate {
                    direction,
                    value,
                    patch: best.with_number(spec.section, &spec.key, value),
                });
            }

            if !self.queue.is_empty() {
                return true;
            }
            // nothing new to try around this value
            self.advance();
        }
    }

    /// The next proposal, or `None` once converged
    pub fn propose(&mut self, session: &OptimizationSession) -> Option<Proposal> {
        if self.revert_pending {
            self.revert_pending = false;
            log::info!("Reverting device to best patch after divergent trial");
            return Some(Proposal::Revert(session.best_patch().clone()));
        }
        if self.queue.is_empty() && !self.plan_round(session) {
            return None;
        }
        let candidate = self.queue.front()?.clone();
        let spec = &self.space.specs()[self.current];
        Some(Proposal::Trial {
            patch: candidate.patch,
            parameter: self.current,
            name: spec.name.clone(),
            direction: candidate.direction,
            value: candidate.value,
        })
    }

    /// Report the measured loss of a proposal
    ///
    /// Returns `true` when the session's best patch changed.
    pub fn accept(
        &mut self,
        session: &mut OptimizationSession,
        proposal: &Proposal,
        loss: f64,
    ) -> bool {
        if proposal.is_revert() {
            return false;
        }
        if let Some(best) = session.best_loss() {
            if loss > best * self.config.divergence_factor {
                log::warn!(
                    "Trial loss {:.4} diverged from best {:.4}; will revert",
                    loss,
                    best
                );
                self.revert_pending = true;
            }
        }
        self.record(session, proposal, Some(loss))
    }

    /// Record a proposal that could not be measured
    pub fn discard(&mut self, session: &mut OptimizationSession, proposal: &Proposal) -> bool {
        if proposal.is_revert() {
            return false;
        }
        self.record(session, proposal, None)
    }

    fn record(
        &mut self,
        session: &mut OptimizationSession,
        proposal: &Proposal,
        loss: Option<f64>,
    ) -> bool {
        let Proposal::Trial { value, .. } = proposal else {
            return false;
        };
        let tol = self
            .space
            .specs()
            .get(self.current)
            .map(Self::tolerance)
            .unwrap_or(1e-9);
        let Some(position) = self
            .queue
            .iter()
            .position(|c| (c.value - value).abs() <= tol)
        else {
            log::warn!("Ignoring result for a proposal that is not pending");
            return false;
        };
        let Some(candidate) = self.queue.remove(position) else {
            return false;
        };

        self.trials_used += 1;
        self.tried.push(candidate.value);
        log::debug!(
            "Trial {}: {} {}{:.4} -> {}",
            self.trials_used,
            self.space.specs()[self.current].name,
            candidate.direction.symbol(),
            candidate.value,
            loss.map(|l| format!("{:.4}", l))
                .unwrap_or_else(|| "discarded".to_string())
        );
        self.outcomes.push(Outcome {
            candidate,
            loss,
            timestamp: Utc::now(),
        });

        if !self.queue.is_empty() && self.trials_used < self.config.max_iterations {
            return false;
        }
        self.resolve_round(session)
    }

    /// Close the current round: pick the winner, append its trials, move on
    ///
    /// Also used to flush a half-finished round when a session stops early.
    pub fn resolve_round(&mut self, session: &mut OptimizationSession) -> bool {
        self.queue.clear();
        if self.outcomes.is_empty() {
            return false;
        }
        let outcomes = std::mem::take(&mut self.outcomes);

        // strict comparison keeps the first (+step) on ties
        let mut winner: Option<usize> = None;
        for (i, outcome) in outcomes.iter().enumerate() {
            if let Some(loss) = outcome.loss {
                let beats = match winner.and_then(|w| outcomes[w].loss) {
                    Some(current) => loss < current,
                    None => true,
                };
                if beats {
                    winner = Some(i);
                }
            }
        }

        let accepted = winner.filter(|&w| {
            let outcome = &outcomes[w];
            match outcome.loss {
                Some(loss) => session.improve(outcome.candidate.patch.clone(), loss),
                None => false,
            }
        });

        let name = self.space.specs()[self.current].name.clone();
        for (i, outcome) in outcomes.into_iter().enumerate() {
            session.push_trial(OptimizationTrial {
                index: 0,
                patch: outcome.candidate.patch,
                loss: outcome.loss,
                parameter_changed: name.clone(),
                direction: outcome.candidate.direction,
                value: outcome.candidate.value,
                accepted: accepted == Some(i),
                timestamp: outcome.timestamp,
            });
        }

        if accepted.is_some() {
            log::info!(
                "Accepted {} -> best loss {:.4}",
                name,
                session.best_loss().unwrap_or(f64::NAN)
            );
            self.accepted_in_sweep = true;
        } else {
            self.advance();
        }

        if self.trials_used >= self.config.max_iterations {
            self.finish(ConvergenceReason::IterationBudget);
        }
        accepted.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::SectionId;
    use approx::assert_relative_eq;

    fn one_param_space(step: f64) -> ParameterSpace {
        ParameterSpace::new(vec![ParameterSpec::new(
            "gain",
            SectionId::Amp,
            "gain",
            0.0,
            1.0,
            step,
        )])
        .unwrap()
    }

    fn session_at(value: f64, loss: f64) -> OptimizationSession {
        let mut session =
            OptimizationSession::new(Patch::new("p").with_number(SectionId::Amp, "gain", value));
        session.record_initial(loss, crate::audio::AudioTake::from_mono(vec![0.0; 4], 44100));
        session
    }

    fn trial_value(proposal: &Proposal) -> f64 {
        match proposal {
            Proposal::Trial { value, .. } => *value,
            Proposal::Revert(_) => panic!("expected a trial"),
        }
    }

    #[test]
    fn test_round_tries_both_directions_before_accepting() {
        let mut opt = CoordinateSearchOptimizer::new(one_param_space(0.1), SearchConfig::default());
        let mut session = session_at(0.5, 1.0);

        let plus = opt.propose(&session).unwrap();
        assert_relative_eq!(trial_value(&plus), 0.6);
        assert!(!opt.accept(&mut session, &plus, 0.9));
        assert!(session.trials().is_empty());

        let minus = opt.propose(&session).unwrap();
        assert_relative_eq!(trial_value(&minus), 0.4);
        assert!(opt.accept(&mut session, &minus, 0.7));

        assert_eq!(session.best_loss(), Some(0.7));
        assert_eq!(session.trials().len(), 2);
        assert!(!session.trials()[0].accepted);
        assert!(session.trials()[1].accepted);
        assert_relative_eq!(opt.step("gain").unwrap(), 0.1);
    }

    #[test]
    fn test_tie_goes_to_increase() {
        let mut opt = CoordinateSearchOptimizer::new(one_param_space(0.1), SearchConfig::default());
        let mut session = session_at(0.5, 1.0);
        let plus = opt.propose(&session).unwrap();
        opt.accept(&mut session, &plus, 0.8);
        let minus = opt.propose(&session).unwrap();
        opt.accept(&mut session, &minus, 0.8);

        assert!(session.trials()[0].accepted);
        assert_relative_eq!(session.best_patch().number(SectionId::Amp, "gain").unwrap(), 0.6);
    }

    #[test]
    fn test_proposals_are_clamped() {
        let mut opt = CoordinateSearchOptimizer::new(one_param_space(0.3), SearchConfig::default());
        let session = session_at(0.9, 1.0);
        let plus = opt.propose(&session).unwrap();
        assert_relative_eq!(trial_value(&plus), 1.0);
    }

    #[test]
    fn test_value_at_bound_skips_that_direction() {
        let mut opt = CoordinateSearchOptimizer::new(one_param_space(0.1), SearchConfig::default());
        let mut session = session_at(1.0, 1.0);
        let first = opt.propose(&session).unwrap();
        assert_relative_eq!(trial_value(&first), 0.9);
        // single candidate, so the round resolves immediately
        assert!(!opt.accept(&mut session, &first, 1.2));
        assert_eq!(session.trials().len(), 1);
        assert_relative_eq!(opt.step("gain").unwrap(), 0.05);
    }

    #[test]
    fn test_divergence_triggers_revert() {
        let mut opt = CoordinateSearchOptimizer::new(one_param_space(0.1), SearchConfig::default());
        let mut session = session_at(0.5, 1.0);
        let plus = opt.propose(&session).unwrap();
        opt.accept(&mut session, &plus, 2.0);

        let next = opt.propose(&session).unwrap();
        assert_eq!(next, Proposal::Revert(session.best_patch().clone()));
        assert!(!opt.accept(&mut session, &next, 0.0));

        let minus = opt.propose(&session).unwrap();
        assert_relative_eq!(trial_value(&minus), 0.4);
    }

    #[test]
    fn test_discarded_trials_count_but_never_win() {
        let mut opt = CoordinateSearchOptimizer::new(one_param_space(0.1), SearchConfig::default());
        let mut session = session_at(0.5, 1.0);
        let plus = opt.propose(&session).unwrap();
        opt.discard(&mut session, &plus);
        let minus = opt.propose(&session).unwrap();
        opt.discard(&mut session, &minus);

        assert_eq!(opt.trials_used(), 2);
        assert_eq!(session.trials().len(), 2);
        assert!(session.trials().iter().all(|t| t.loss.is_none() && !t.accepted));
        assert_eq!(session.best_loss(), Some(1.0));
    }

    #[test]
    fn test_flat_landscape_converges_without_improvement() {
        let mut opt = CoordinateSearchOptimizer::new(one_param_space(0.1), SearchConfig::default());
        let mut session = session_at(0.5, 1.0);
        while let Some(p) = opt.propose(&session) {
            opt.accept(&mut session, &p, 1.0);
        }
        assert_eq!(opt.finished(), Some(ConvergenceReason::NoImprovementInSweep));
        assert_eq!(session.trials().len(), 2);
    }

    #[test]
    fn test_steps_below_resolution() {
        let spec = ParameterSpec::new("gain", SectionId::Amp, "gain", 0.0, 1.0, 0.1)
            .with_min_step(0.5);
        let space = ParameterSpace::new(vec![spec]).unwrap();
        let mut opt = CoordinateSearchOptimizer::new(space, SearchConfig::default());
        assert!(opt.propose(&session_at(0.5, 1.0)).is_none());
        assert_eq!(opt.finished(), Some(ConvergenceReason::StepsBelowResolution));
    }
}
