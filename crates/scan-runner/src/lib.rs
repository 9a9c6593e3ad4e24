//! Session engine for the baggage screening task.
//!
//! A [`Session`] walks a participant through consent, mode selection, a fixed
//! number of randomized bag trials and a terminal summary. All randomness is
//! drawn from the caller's [`rand::Rng`], so a seeded generator replays a
//! session exactly.

mod config;
mod verification;

pub use config::{ConfigError, StudyInfo, TaskConfig, DEFAULT_SAFE_ITEMS, DEFAULT_THREAT_ITEMS};
pub use verification::{run_verification, VerificationReport};

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Mode {
    Manual,
    #[serde(rename = "AI_Assist")]
    AiAssist,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Manual => "Manual",
            Mode::AiAssist => "AI_Assist",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Manual" => Ok(Mode::Manual),
            "AI_Assist" => Ok(Mode::AiAssist),
            other => Err(format!("unknown mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Outcome {
    #[serde(rename = "CORRECT")]
    Correct,
    #[serde(rename = "ERROR")]
    Error,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Correct => "CORRECT",
            Outcome::Error => "ERROR",
        }
    }

    pub fn is_correct(&self) -> bool {
        matches!(self, Outcome::Correct)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CORRECT" => Ok(Outcome::Correct),
            "ERROR" => Ok(Outcome::Error),
            other => Err(format!("unknown result: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Advice {
    Threat,
    Clear,
}

impl Advice {
    fn from_truth(threat: bool) -> Self {
        if threat {
            Advice::Threat
        } else {
            Advice::Clear
        }
    }

    fn flipped(self) -> Self {
        match self {
            Advice::Threat => Advice::Clear,
            Advice::Clear => Advice::Threat,
        }
    }
}

/// Clamps into [0, 1] for `gen_bool`; NaN counts as 0.
pub(crate) fn clamp_probability(p: f64) -> f64 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(0.0, 1.0)
    }
}

/// Returns the ground truth, flipped with probability `error_rate`
/// (clamped into [0, 1]). Every call is an independent roll.
pub fn recommend<R: Rng + ?Sized>(ground_truth: bool, error_rate: f64, rng: &mut R) -> Advice {
    let advice = Advice::from_truth(ground_truth);
    if rng.gen_bool(clamp_probability(error_rate)) {
        advice.flipped()
    } else {
        advice
    }
}

#[derive(Debug, Clone)]
pub struct Trial {
    pub round: u32,
    pub items: Vec<String>,
    pub has_threat: bool,
    pub presented_at: Instant,
}

/// Draws a bag: N distinct safe items, N uniform in the configured range,
/// plus at most one threat item, shuffled. `cfg` must have passed
/// [`TaskConfig::validate`].
pub fn generate_trial<R: Rng + ?Sized>(
    cfg: &TaskConfig,
    round: u32,
    rng: &mut R,
    presented_at: Instant,
) -> Trial {
    let count = rng.gen_range(cfg.min_safe_items..=cfg.max_safe_items);
    let mut items: Vec<String> = cfg.safe_items.choose_multiple(rng, count).cloned().collect();
    let threat_item = if rng.gen_bool(cfg.threat_probability) {
        cfg.threat_items.choose(rng).cloned()
    } else {
        None
    };
    let has_threat = threat_item.is_some();
    items.extend(threat_item);
    items.shuffle(rng);
    debug!(round, items = items.len(), has_threat, "trial generated");
    Trial {
        round,
        items,
        has_threat,
        presented_at,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub round: u32,
    pub mode: Mode,
    pub threat: bool,
    pub user_reject: bool,
    pub result: Outcome,
    /// Reaction time in seconds, millisecond resolution.
    pub time: f64,
}

pub fn evaluate(trial: &Trial, mode: Mode, user_reject: bool, decided_at: Instant) -> DecisionRecord {
    let elapsed = decided_at.saturating_duration_since(trial.presented_at);
    let time = (elapsed.as_secs_f64() * 1000.0).round() / 1000.0;
    let result = if user_reject == trial.has_threat {
        Outcome::Correct
    } else {
        Outcome::Error
    };
    DecisionRecord {
        round: trial.round,
        mode,
        threat: trial.has_threat,
        user_reject,
        result,
        time,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingConsent,
    Menu,
    Active,
    Summary,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::AwaitingConsent => "awaiting consent",
            Phase::Menu => "in menu",
            Phase::Active => "active",
            Phase::Summary => "in summary",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("cannot {action} while session is {phase}")]
    InvalidTransition { action: &'static str, phase: Phase },
}

#[derive(Debug, Clone)]
pub struct DecisionOutcome {
    pub record: DecisionRecord,
    pub score: u32,
    pub session_complete: bool,
}

pub struct Session<R> {
    config: TaskConfig,
    rng: R,
    phase: Phase,
    consent_given: bool,
    score: u32,
    rounds: u32,
    mode: Mode,
    history: Vec<DecisionRecord>,
    current: Option<Trial>,
}

impl<R: Rng> Session<R> {
    pub fn new(config: TaskConfig, rng: R) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            rng,
            phase: Phase::AwaitingConsent,
            consent_given: false,
            score: 0,
            rounds: 0,
            mode: Mode::Manual,
            history: Vec::new(),
            current: None,
        })
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn consent_given(&self) -> bool {
        self.consent_given
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_active(&self) -> bool {
        self.phase == Phase::Active
    }

    pub fn history(&self) -> &[DecisionRecord] {
        &self.history
    }

    pub fn current_trial(&self) -> Option<&Trial> {
        self.current.as_ref()
    }

    fn expect_phase(&self, expected: Phase, action: &'static str) -> Result<(), SessionError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidTransition {
                action,
                phase: self.phase,
            })
        }
    }

    pub fn give_consent(&mut self) -> Result<(), SessionError> {
        self.expect_phase(Phase::AwaitingConsent, "give consent")?;
        self.consent_given = true;
        self.phase = Phase::Menu;
        info!("consent recorded");
        Ok(())
    }

    pub fn start(&mut self, mode: Mode) -> Result<&Trial, SessionError> {
        self.start_at(mode, Instant::now())
    }

    pub fn start_at(&mut self, mode: Mode, now: Instant) -> Result<&Trial, SessionError> {
        self.expect_phase(Phase::Menu, "start a session")?;
        self.mode = mode;
        self.phase = Phase::Active;
        info!(mode = mode.as_str(), rounds = self.config.rounds, "session started");
        Ok(self.next_trial(now))
    }

    fn next_trial(&mut self, now: Instant) -> &Trial {
        let trial = generate_trial(&self.config, self.rounds + 1, &mut self.rng, now);
        self.current.insert(trial)
    }

    pub fn advise(&mut self) -> Result<Option<Advice>, SessionError> {
        self.expect_phase(Phase::Active, "request advice")?;
        if self.mode != Mode::AiAssist {
            return Ok(None);
        }
        let Some(trial) = self.current.as_ref() else {
            return Ok(None);
        };
        Ok(Some(recommend(
            trial.has_threat,
            self.config.advisor_error_rate,
            &mut self.rng,
        )))
    }

    pub fn decide(&mut self, user_reject: bool) -> Result<DecisionOutcome, SessionError> {
        self.decide_at(user_reject, Instant::now())
    }

    pub fn decide_at(
        &mut self,
        user_reject: bool,
        now: Instant,
    ) -> Result<DecisionOutcome, SessionError> {
        self.expect_phase(Phase::Active, "record a decision")?;
        let Some(trial) = self.current.take() else {
            return Err(SessionError::InvalidTransition {
                action: "record a decision",
                phase: self.phase,
            });
        };
        let record = evaluate(&trial, self.mode, user_reject, now);
        if record.result.is_correct() {
            self.score += self.config.points_per_correct;
        }
        self.rounds += 1;
        self.history.push(record.clone());
        debug!(
            round = record.round,
            result = record.result.as_str(),
            time = record.time,
            "decision recorded"
        );

        let session_complete = self.rounds >= self.config.rounds;
        if session_complete {
            self.phase = Phase::Summary;
            info!(score = self.score, rounds = self.rounds, "session complete");
        } else {
            self.next_trial(now);
        }
        Ok(DecisionOutcome {
            record,
            score: self.score,
            session_complete,
        })
    }

    pub fn restart(&mut self) -> Result<(), SessionError> {
        self.expect_phase(Phase::Summary, "restart")?;
        self.score = 0;
        self.rounds = 0;
        self.history.clear();
        self.current = None;
        self.phase = Phase::Menu;
        info!("session restarted");
        Ok(())
    }
}
