//! Human-readable session summary

use std::fmt::Write;

use crate::session::state::{OptimizationSession, SessionStatus};

fn loss_text(loss: Option<f64>) -> String {
    loss.map(|l| format!("{:.6}", l))
        .unwrap_or_else(|| "-".to_string())
}

fn value_text(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.4}", v))
        .unwrap_or_else(|| "unset".to_string())
}

/// Render the plain-text report written next to the exported patches
pub fn render_report(session: &OptimizationSession) -> String {
    let mut out = String::new();
    // writing into a String cannot fail
    let _ = write_report(&mut out, session);
    out
}

fn write_report(out: &mut String, session: &OptimizationSession) -> std::fmt::Result {
    writeln!(out, "Tone match session {}", session.id())?;
    writeln!(out, "{}", "=".repeat(60))?;
    writeln!(out, "Patch:        {}", session.initial_patch().name())?;
    writeln!(out, "Started:      {}", session.started_at().to_rfc3339())?;
    if let Some(finished) = session.finished_at() {
        writeln!(out, "Finished:     {}", finished.to_rfc3339())?;
    }

    match session.status() {
        SessionStatus::Converged { reason } => {
            writeln!(out, "Status:       converged ({})", reason)?;
        }
        SessionStatus::Aborted { reason } => {
            writeln!(out, "Status:       aborted [{}] {}", reason.code, reason.message)?;
            writeln!(out, "              best patch found before the abort is kept")?;
        }
        other => writeln!(out, "Status:       {}", other)?,
    }

    writeln!(out, "Iterations:   {}", session.iterations())?;
    writeln!(out, "Accepted:     {}", session.accepted_count())?;
    writeln!(out, "Initial loss: {}", loss_text(session.initial_loss()))?;
    writeln!(out, "Final loss:   {}", loss_text(session.best_loss()))?;
    match (session.improvement(), session.initial_loss()) {
        (Some(delta), Some(initial)) if initial > 0.0 => writeln!(
            out,
            "Improvement:  {:.6} ({:.1}%)",
            delta,
            100.0 * delta / initial
        )?,
        (Some(delta), _) => writeln!(out, "Improvement:  {:.6}", delta)?,
        _ => writeln!(out, "Improvement:  -")?,
    }

    writeln!(out)?;
    writeln!(out, "Calibration")?;
    writeln!(out, "{}", "-".repeat(60))?;
    match session.calibration() {
        Some(profile) => {
            writeln!(out, "Latency:      {:.2} ms", profile.latency_ms)?;
            writeln!(out, "Gain ratio:   {:+.2} dB", profile.gain_ratio_db)?;
            writeln!(out, "Confidence:   {:.3}", profile.confidence)?;
            writeln!(out, "Sample rate:  {} Hz", profile.sample_rate)?;
        }
        None => writeln!(out, "not calibrated")?,
    }

    writeln!(out)?;
    writeln!(out, "Changed parameters")?;
    writeln!(out, "{}", "-".repeat(60))?;
    let changes = session.changed_parameters();
    if changes.is_empty() {
        writeln!(out, "none")?;
    }
    for change in &changes {
        writeln!(
            out,
            "{:<24} {:>10} -> {:<10}",
            format!("{}.{}", change.section.as_str(), change.key),
            value_text(change.from),
            value_text(change.to)
        )?;
    }

    writeln!(out)?;
    writeln!(out, "Loss over iterations")?;
    writeln!(out, "{}", "-".repeat(60))?;
    writeln!(
        out,
        "{:>4}  {:<20} {:>3} {:>10} {:>12}  {}",
        "#", "parameter", "dir", "value", "loss", "accepted"
    )?;
    for trial in session.trials() {
        writeln!(
            out,
            "{:>4}  {:<20} {:>3} {:>10.4} {:>12}  {}",
            trial.index,
            trial.parameter_changed,
            trial.direction.symbol(),
            trial.value,
            loss_text(trial.loss),
            if trial.accepted { "yes" } else { "" }
        )?;
    }
    Ok(())
}
