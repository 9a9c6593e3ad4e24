//! Monte-Carlo check of the advisor model.
//!
//! Samples bags with the configured threat probability, asks the advisor
//! about each one and tallies how often it is right. Runs on its own RNG and
//! never touches a live [`crate::Session`].

use rand::Rng;
use serde::Serialize;
use tracing::info;

use crate::{clamp_probability, recommend, Advice};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub trials: u32,
    pub threats: u32,
    pub advisor_correct: u32,
    pub hits: u32,
    pub misses: u32,
    pub false_alarms: u32,
    pub correct_rejections: u32,
}

impl VerificationReport {
    /// Share of trials where the advice matched ground truth.
    pub fn reliability(&self) -> f64 {
        ratio(self.advisor_correct, self.trials)
    }

    pub fn threat_rate(&self) -> f64 {
        ratio(self.threats, self.trials)
    }
}

fn ratio(num: u32, den: u32) -> f64 {
    if den == 0 {
        0.0
    } else {
        f64::from(num) / f64::from(den)
    }
}

/// Probabilities outside [0, 1] are clamped, as in [`recommend`].
pub fn run_verification<R: Rng + ?Sized>(
    trials: u32,
    threat_probability: f64,
    advisor_error_rate: f64,
    rng: &mut R,
) -> VerificationReport {
    let threat_probability = clamp_probability(threat_probability);
    let mut report = VerificationReport {
        trials,
        ..VerificationReport::default()
    };
    for _ in 0..trials {
        let is_threat = rng.gen_bool(threat_probability);
        let advice = recommend(is_threat, advisor_error_rate, rng);
        if is_threat {
            report.threats += 1;
        }
        match (is_threat, advice) {
            (true, Advice::Threat) => report.hits += 1,
            (true, Advice::Clear) => report.misses += 1,
            (false, Advice::Threat) => report.false_alarms += 1,
            (false, Advice::Clear) => report.correct_rejections += 1,
        }
    }
    report.advisor_correct = report.hits + report.correct_rejections;
    info!(
        trials,
        reliability = report.reliability(),
        threat_rate = report.threat_rate(),
        "verification complete"
    );
    report
}
