//! Optimizer Tests
//!
//! Drives the coordinate search against synthetic loss landscapes, without
//! hardware: every proposal is scored by a closure.

use approx::assert_relative_eq;
use pretty_assertions::assert_eq;

use stompmatch::audio::AudioTake;
use stompmatch::config::SearchConfig;
use stompmatch::optimize::{CoordinateSearchOptimizer, ParameterSpace, ParameterSpec, Proposal};
use stompmatch::patch::{Patch, SectionId};
use stompmatch::session::{ConvergenceReason, OptimizationSession};

fn silent_take() -> AudioTake {
    AudioTake::from_mono(vec![0.0; 16], 44100)
}

/// `delay_mix` followed by `extra` flat knobs on the amp section
fn space_with_knobs(extra: usize) -> (ParameterSpace, Patch) {
    let mut specs = vec![ParameterSpec::new("delay_mix", SectionId::Delay, "mix", 0.0, 1.0, 0.05)];
    let mut patch = Patch::new("Scenario").with_number(SectionId::Delay, "mix", 0.2);
    for i in 0..extra {
        let key = format!("knob_{}", i);
        specs.push(ParameterSpec::new(&key, SectionId::Amp, &key, 0.0, 1.0, 0.05));
        patch = patch.with_number(SectionId::Amp, &key, 0.5);
    }
    (ParameterSpace::new(specs).unwrap(), patch)
}

fn start(patch: Patch, loss: f64) -> OptimizationSession {
    let mut session = OptimizationSession::new(patch);
    session.record_initial(loss, silent_take());
    session
}

/// Run the search to completion, returning every proposal it made
fn drive<F>(
    optimizer: &mut CoordinateSearchOptimizer,
    session: &mut OptimizationSession,
    loss: F,
) -> Vec<Proposal>
where
    F: Fn(&Patch) -> f64,
{
    let mut proposals = Vec::new();
    while let Some(proposal) = optimizer.propose(session) {
        if !proposal.is_revert() {
            let l = loss(proposal.patch());
            optimizer.accept(session, &proposal, l);
        }
        proposals.push(proposal);
        assert!(proposals.len() < 10_000, "search did not terminate");
    }
    proposals
}

fn delay_mix(patch: &Patch) -> f64 {
    patch.number(SectionId::Delay, "mix").unwrap()
}

fn bowl(patch: &Patch) -> f64 {
    1.0 + (delay_mix(patch) - 0.35).powi(2)
}

#[test]
fn test_delay_mix_scenario() {
    let (space, patch) = space_with_knobs(19);
    assert_eq!(space.len(), 20);
    let config = SearchConfig {
        max_iterations: 15,
        ..SearchConfig::default()
    };
    let mut optimizer = CoordinateSearchOptimizer::new(space, config);
    let mut session = start(patch.clone(), bowl(&patch));

    drive(&mut optimizer, &mut session, bowl);

    let trials = session.trials();
    assert_eq!(trials.len(), 15);
    assert_eq!(optimizer.finished(), Some(ConvergenceReason::IterationBudget));

    let mix_trials: Vec<_> = trials.iter().filter(|t| t.parameter_changed == "delay_mix").collect();
    assert_eq!(mix_trials.len(), 5);
    assert_eq!(mix_trials.iter().filter(|t| t.accepted).count(), 3);
    assert_eq!(session.accepted_count(), 3);

    assert_relative_eq!(delay_mix(session.best_patch()), 0.35, epsilon = 1e-9);
    assert_relative_eq!(session.best_loss().unwrap(), 1.0, epsilon = 1e-9);
    assert_relative_eq!(optimizer.step("delay_mix").unwrap(), 0.025, epsilon = 1e-12);

    // the five remaining trials visit the next five knobs, two each
    for (i, pair) in trials[5..].chunks(2).enumerate() {
        let name = format!("knob_{}", i);
        assert!(pair.iter().all(|t| t.parameter_changed == name));
        assert!(pair.iter().all(|t| !t.accepted));
    }
}

#[test]
fn test_best_loss_never_increases() {
    let (space, patch) = space_with_knobs(3);
    let landscape = |p: &Patch| {
        let knob = p.number(SectionId::Amp, "knob_1").unwrap();
        bowl(p) + (knob - 0.8).powi(2) + 0.01 * (17.0 * knob).sin()
    };
    let mut optimizer = CoordinateSearchOptimizer::new(
        space,
        SearchConfig {
            max_iterations: 60,
            ..SearchConfig::default()
        },
    );
    let mut session = start(patch.clone(), landscape(&patch));
    drive(&mut optimizer, &mut session, landscape);

    let mut best = session.initial_loss().unwrap();
    for trial in session.trials() {
        if trial.accepted {
            let loss = trial.loss.unwrap();
            assert!(loss < best, "accepted {} after best {}", loss, best);
            best = loss;
        }
    }
    assert_relative_eq!(best, session.best_loss().unwrap());
    assert!(session.best_loss().unwrap() < session.initial_loss().unwrap());
    assert!(session.trials().len() <= 60);
}

#[test]
fn test_proposals_stay_within_bounds() {
    let space = ParameterSpace::new(vec![ParameterSpec::new(
        "delay_feedback",
        SectionId::Delay,
        "feedback",
        0.0,
        0.95,
        0.2,
    )])
    .unwrap();
    let patch = Patch::new("Edge").with_number(SectionId::Delay, "feedback", 0.9);
    // pulls upwards, so the search keeps pressing on the upper bound
    let upward = |p: &Patch| 2.0 - p.number(SectionId::Delay, "feedback").unwrap();
    let mut optimizer = CoordinateSearchOptimizer::new(space, SearchConfig::default());
    let mut session = start(patch.clone(), upward(&patch));

    let proposals = drive(&mut optimizer, &mut session, upward);
    assert!(!proposals.is_empty());
    for proposal in &proposals {
        let value = proposal.patch().number(SectionId::Delay, "feedback").unwrap();
        assert!((0.0..=0.95).contains(&value), "proposed {}", value);
    }
    assert_relative_eq!(
        session.best_patch().number(SectionId::Delay, "feedback").unwrap(),
        0.95
    );
}

#[test]
fn test_divergent_trial_triggers_revert() {
    let (space, patch) = space_with_knobs(0);
    let mut optimizer = CoordinateSearchOptimizer::new(space, SearchConfig::default());
    let mut session = start(patch.clone(), 1.0);

    let first = optimizer.propose(&session).unwrap();
    assert!(!first.is_revert());
    // three times worse than the best
    optimizer.accept(&mut session, &first, 3.0);

    let next = optimizer.propose(&session).unwrap();
    assert!(next.is_revert());
    assert_eq!(next.patch(), session.best_patch());
    assert_eq!(next.patch(), &patch);

    // the search carries on afterwards
    let after = optimizer.propose(&session).unwrap();
    assert!(!after.is_revert());
}

#[test]
fn test_flat_landscape_converges_without_changes() {
    let (space, patch) = space_with_knobs(2);
    let mut optimizer = CoordinateSearchOptimizer::new(
        space,
        SearchConfig {
            max_iterations: 1000,
            ..SearchConfig::default()
        },
    );
    let mut session = start(patch.clone(), 1.0);
    drive(&mut optimizer, &mut session, |_| 1.0);

    assert_eq!(optimizer.finished(), Some(ConvergenceReason::NoImprovementInSweep));
    assert_eq!(session.best_patch(), &patch);
    assert_eq!(session.accepted_count(), 0);
    assert!(session.changed_parameters().is_empty());
}
