//! Hardware-in-the-loop control loop
//!
//! Drives one session from start to finish:
//!
//! 1. **Calibrating**: measure loop latency and gain.
//! 2. **Evaluating**: load the initial patch and record its loss as the
//!    first best.
//! 3. **Searching**: send each proposal as a diff against what the unit
//!    holds, capture, align, score, report back to the optimizer.
//! 4. **Converged** or **Aborted**: restore the best patch on the unit and
//!    export the session when an output directory is configured.
//!
//! Everything runs on the caller's thread. The only other thread is the
//! device session's drain worker.

use std::time::Duration;

use crate::align::SignalAligner;
use crate::audio::{AudioIo, AudioTake};
use crate::calibration::{CalibrationEngine, CalibrationProfile};
use crate::config::StompConfig;
use crate::device::DeviceSession;
use crate::error::{Result, StompError};
use crate::loss::PerceptualLossEvaluator;
use crate::optimize::{CoordinateSearchOptimizer, ParameterSpace};
use crate::patch::{Patch, PatchCodec};
use crate::session::export;
use crate::session::state::{
    AbortReason, CancellationToken, ConvergenceReason, OptimizationSession, SessionStatus,
};

/// How a run that did not fail came to an end
enum Finish {
    Converged(ConvergenceReason),
    Cancelled,
}

pub struct OptimizationOrchestrator {
    config: StompConfig,
    space: ParameterSpace,
    codec: PatchCodec,
    device: DeviceSession,
    audio: Box<dyn AudioIo>,
    calibration: CalibrationEngine,
    aligner: SignalAligner,
    evaluator: PerceptualLossEvaluator,
    cancel: CancellationToken,
    /// What the unit currently holds, as far as we know
    live: Option<Patch>,
}

impl OptimizationOrchestrator {
    /// Validate `config` and take ownership of the device and audio handles
    pub fn new(config: StompConfig, device: DeviceSession, audio: Box<dyn AudioIo>) -> Result<Self> {
        config.validate()?;
        let space = config.parameter_space()?;
        Ok(Self {
            calibration: CalibrationEngine::new(config.calibration.clone()),
            aligner: SignalAligner::new(config.alignment.clone(), config.calibration.min_confidence),
            evaluator: PerceptualLossEvaluator::new(config.loss.clone()),
            codec: PatchCodec::new(),
            cancel: CancellationToken::new(),
            live: None,
            space,
            config,
            device,
            audio,
        })
    }

    /// Use an externally owned stop flag
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &StompConfig {
        &self.config
    }

    pub fn device(&self) -> &DeviceSession {
        &self.device
    }

    /// Run a complete session
    ///
    /// Never fails: errors end the session as `Aborted` with their code and
    /// message, and the best patch found so far stays in the session.
    pub fn run(&mut self, initial: &Patch, target: &AudioTake, dry: &AudioTake) -> OptimizationSession {
        let mut session = OptimizationSession::new(initial.clone());
        log::info!(
            "Starting session {} for patch '{}' ({} parameters)",
            session.id(),
            initial.name(),
            self.space.len()
        );

        match self.drive(&mut session, target, dry) {
            Ok(Finish::Converged(reason)) => {
                session.transition(SessionStatus::Converged { reason });
            }
            Ok(Finish::Cancelled) => {
                log::warn!("Session {} cancelled", session.id());
                session.transition(SessionStatus::Aborted {
                    reason: AbortReason::cancelled(),
                });
            }
            Err(err) => {
                log::error!("Session {} aborted: {}", session.id(), err);
                for hint in err.recovery_suggestions() {
                    log::error!("  - {}", hint);
                }
                session.transition(SessionStatus::Aborted {
                    reason: AbortReason::from(&err),
                });
            }
        }

        self.restore_best(&session);

        if let Some(dir) = self.config.export.output_dir.clone() {
            if let Err(err) = export::export_session(
                &session,
                &self.codec,
                &dir,
                &self.config.export.session_name,
                self.config.device.patch_index,
            ) {
                log::error!("Export to {} failed: {}", dir.display(), err);
            }
        }
        session
    }

    fn drive(&mut self, session: &mut OptimizationSession, target: &AudioTake, dry: &AudioTake) -> Result<Finish> {
        // Calibrating
        session.transition(SessionStatus::Calibrating);
        if self.cancel.is_cancelled() {
            return Ok(Finish::Cancelled);
        }
        let timeout = self.duplex_timeout(self.config.calibration.stimulus_secs());
        let profile = self.calibration.calibrate(self.audio.as_mut(), timeout)?;
        session.set_calibration(profile.clone());
        session.transition(SessionStatus::Evaluating);

        // Evaluating
        self.check_inputs(target, dry)?;
        self.space.check_patch(session.initial_patch())?;
        for warning in self.space.relationship_warnings(session.initial_patch()) {
            log::warn!("Initial patch: {}", warning);
        }
        if self.cancel.is_cancelled() {
            return Ok(Finish::Cancelled);
        }
        let initial = session.initial_patch().clone();
        self.device.send_frames(&self.codec.encode(&initial)?)?;
        self.live = Some(initial);

        let Some((initial_loss, initial_take)) = self.measure_initial(dry, target, &profile)? else {
            return Ok(Finish::Cancelled);
        };
        log::info!("Initial loss {:.4}", initial_loss);
        session.record_initial(initial_loss, initial_take);
        session.transition(SessionStatus::Searching);

        // Searching
        let mut optimizer = CoordinateSearchOptimizer::new(self.space.clone(), self.config.search.clone());
        let mut round_takes: Vec<(Patch, AudioTake)> = Vec::new();
        let outcome = self.search(session, &mut optimizer, &mut round_takes, dry, target, &profile);

        // a round cut short still counts: its measured trials are kept
        if optimizer.resolve_round(session) {
            Self::keep_best_take(session, &round_takes);
        }
        outcome
    }

    fn search(
        &mut self,
        session: &mut OptimizationSession,
        optimizer: &mut CoordinateSearchOptimizer,
        round_takes: &mut Vec<(Patch, AudioTake)>,
        dry: &AudioTake,
        target: &AudioTake,
        profile: &CalibrationProfile,
    ) -> Result<Finish> {
        let mut consecutive_failures = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(Finish::Cancelled);
            }
            let Some(proposal) = optimizer.propose(session) else {
                break;
            };

            self.load(proposal.patch())?;
            if proposal.is_revert() {
                continue;
            }

            let trials_before = session.iterations();
            let improved = match self.measure_with_retry(dry, target, profile) {
                Ok((loss, take)) => {
                    consecutive_failures = 0;
                    round_takes.push((proposal.patch().clone(), take));
                    optimizer.accept(session, &proposal, loss)
                }
                Err(err) if err.is_retryable() => {
                    consecutive_failures += 1;
                    log::warn!(
                        "Trial discarded ({} consecutive failures): {}",
                        consecutive_failures,
                        err
                    );
                    let improved = optimizer.discard(session, &proposal);
                    if consecutive_failures > self.config.alignment.failure_budget {
                        if improved {
                            Self::keep_best_take(session, round_takes);
                        }
                        return Err(err);
                    }
                    improved
                }
                Err(err) => return Err(err),
            };

            if improved {
                Self::keep_best_take(session, round_takes);
            }
            if session.iterations() != trials_before {
                round_takes.clear();
            }
        }

        Ok(Finish::Converged(
            optimizer
                .finished()
                .unwrap_or(ConvergenceReason::NoImprovementInSweep),
        ))
    }

    /// Score the initial patch under the consecutive-failure budget
    ///
    /// `None` when the session is cancelled between attempts.
    fn measure_initial(
        &mut self,
        dry: &AudioTake,
        target: &AudioTake,
        profile: &CalibrationProfile,
    ) -> Result<Option<(f64, AudioTake)>> {
        let mut failures = 0u32;
        loop {
            match self.measure_with_retry(dry, target, profile) {
                Ok(measured) => return Ok(Some(measured)),
                Err(err) if err.is_retryable() => {
                    failures += 1;
                    if failures > self.config.alignment.failure_budget {
                        return Err(err);
                    }
                    log::warn!(
                        "Initial measurement failed ({} consecutive failures): {}",
                        failures,
                        err
                    );
                }
                Err(err) => return Err(err),
            }
            if self.cancel.is_cancelled() {
                return Ok(None);
            }
        }
    }

    fn check_inputs(&self, target: &AudioTake, dry: &AudioTake) -> Result<()> {
        let rate = self.audio.sample_rate();
        for (what, take) in [("target", target), ("dry", dry)] {
            if take.is_empty() {
                return Err(StompError::InvalidAudio {
                    reason: format!("{} take is empty", what),
                });
            }
            if take.sample_rate() != rate {
                return Err(StompError::InvalidAudio {
                    reason: format!(
                        "{} take is {} Hz, audio loop runs at {} Hz",
                        what,
                        take.sample_rate(),
                        rate
                    ),
                });
            }
        }
        Ok(())
    }

    fn duplex_timeout(&self, signal_secs: f64) -> Duration {
        Duration::from_millis(self.config.audio.io_timeout_ms) + Duration::from_secs_f64(signal_secs.max(0.0))
    }

    /// Bring the unit to `patch`, sending only what changed
    fn load(&mut self, patch: &Patch) -> Result<()> {
        let frames = match &self.live {
            Some(live) => self.codec.encode_diff(live, patch)?,
            None => self.codec.encode(patch)?,
        };
        if !frames.is_empty() {
            self.device.send_frames(&frames)?;
        }
        self.live = Some(patch.clone());
        Ok(())
    }

    /// Leave the unit on the best patch; failures only get logged
    fn restore_best(&mut self, session: &OptimizationSession) {
        if self.live.is_none() || self.live.as_ref() == Some(session.best_patch()) {
            return;
        }
        if let Err(err) = self.load(session.best_patch()) {
            log::warn!("Could not restore best patch on the unit: {}", err);
        }
    }

    fn keep_best_take(session: &mut OptimizationSession, round_takes: &[(Patch, AudioTake)]) {
        if let Some((_, take)) = round_takes.iter().find(|(p, _)| p == session.best_patch()) {
            session.set_best_take(take.clone());
        }
    }

    /// Play the dry signal through the unit and score the aligned capture
    fn measure(&mut self, dry: &AudioTake, target: &AudioTake, profile: &CalibrationProfile) -> Result<(f64, AudioTake)> {
        let settle = Duration::from_millis(self.config.audio.settle_ms);
        if !settle.is_zero() {
            std::thread::sleep(settle);
        }
        let tail = crate::dsp::ms_to_samples(self.config.audio.tail_padding_ms as f64, dry.sample_rate());
        let stimulus = dry.padded(tail);
        let captured = self
            .audio
            .play_record(&stimulus, self.duplex_timeout(stimulus.duration_secs()))?;
        let aligned = self.aligner.align(&stimulus, &captured, profile)?;
        let loss = self.evaluator.loss(target, &aligned)?;
        Ok((loss, aligned))
    }

    /// [`measure`](Self::measure), retried once on a transient failure
    fn measure_with_retry(
        &mut self,
        dry: &AudioTake,
        target: &AudioTake,
        profile: &CalibrationProfile,
    ) -> Result<(f64, AudioTake)> {
        match self.measure(dry, target, profile) {
            Err(err) if err.is_retryable() => {
                log::warn!("Measurement failed ({}), retrying once", err);
                self.measure(dry, target, profile)
            }
            other => other,
        }
    }
}
