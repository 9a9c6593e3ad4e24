use anyhow::Result;
use chrono::Utc;
use rand::Rng;
use scan_analysis::{export_session, render_summary, summarize, ExportResult, SessionMeta};
use scan_runner::{run_verification, Advice, Mode, Phase, Session, VerificationReport};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tracing::warn;

pub struct PlayOptions {
    pub out_dir: PathBuf,
    pub participant: Option<String>,
    pub seed: Option<u64>,
}

fn prompt<I: BufRead, O: Write>(input: &mut I, output: &mut O, text: &str) -> Result<Option<String>> {
    write!(output, "{} ", text)?;
    output.flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        writeln!(output)?;
        return Ok(None);
    }
    Ok(Some(line.trim().to_lowercase()))
}

fn rule<O: Write>(output: &mut O) -> Result<()> {
    writeln!(output, "{}", "-".repeat(48))?;
    Ok(())
}

/// Drives `session` from stdin-style input until the participant quits or
/// input ends. Completed sessions are exported under `opts.out_dir`; the
/// exports are returned in order.
pub fn run_interactive<R, V, I, O>(
    session: &mut Session<R>,
    verify_rng: &mut V,
    input: &mut I,
    output: &mut O,
    opts: &PlayOptions,
) -> Result<Vec<ExportResult>>
where
    R: Rng,
    V: Rng,
    I: BufRead,
    O: Write,
{
    let mut exports: Vec<ExportResult> = Vec::new();
    let mut verification: Option<VerificationReport> = None;

    writeln!(output, "Baggage Inspection Task")?;
    loop {
        match session.phase() {
            Phase::AwaitingConsent => {
                render_consent(session, output)?;
                match prompt(input, output, "[y] I consent & agree to participate  [q] quit:")?
                    .as_deref()
                {
                    Some("y") | Some("yes") => session.give_consent()?,
                    Some("q") | None => return Ok(exports),
                    Some(_) => writeln!(output, "Please answer y or q.")?,
                }
            }
            Phase::Menu => {
                render_menu(session, verification.as_ref(), output)?;
                match prompt(input, output, "[1] Manual  [2] AI-Assisted  [3] Verify  [q] quit:")?
                    .as_deref()
                {
                    Some("1") => {
                        session.start(Mode::Manual)?;
                    }
                    Some("2") => {
                        session.start(Mode::AiAssist)?;
                    }
                    Some("3") => {
                        let cfg = session.config();
                        verification = Some(run_verification(
                            cfg.verification_trials,
                            cfg.threat_probability,
                            cfg.advisor_error_rate,
                            verify_rng,
                        ));
                    }
                    Some("q") | None => return Ok(exports),
                    Some(other) => writeln!(output, "Unknown option: {}", other)?,
                }
            }
            Phase::Active => {
                render_trial(session, output)?;
                let user_reject = match prompt(input, output, "[c] CLEAR BAG  [r] REPORT THREAT:")?
                    .as_deref()
                {
                    Some("c") => false,
                    Some("r") => true,
                    Some("q") | None => {
                        warn!(rounds = session.rounds(), "session abandoned before completion");
                        return Ok(exports);
                    }
                    Some(other) => {
                        writeln!(output, "Unknown option: {}", other)?;
                        continue;
                    }
                };
                let outcome = session.decide(user_reject)?;
                if outcome.session_complete {
                    let meta = SessionMeta {
                        participant: opts.participant.clone(),
                        score: session.score(),
                        max_score: session.config().max_score(),
                        seed: opts.seed,
                        created_at: Utc::now(),
                    };
                    exports.push(export_session(&opts.out_dir, session.history(), &meta)?);
                }
            }
            Phase::Summary => {
                render_end(session, exports.last(), output)?;
                match prompt(input, output, "[m] Return to main menu  [q] quit:")?.as_deref() {
                    Some("m") => {
                        session.restart()?;
                        verification = None;
                    }
                    Some("q") | None => return Ok(exports),
                    Some(other) => writeln!(output, "Unknown option: {}", other)?,
                }
            }
        }
    }
}

fn render_consent<R: Rng, O: Write>(session: &Session<R>, output: &mut O) -> Result<()> {
    rule(output)?;
    writeln!(output, "Participant Information & Consent")?;
    let study = &session.config().study;
    if let Some(title) = &study.title {
        writeln!(output, "Study: {}", title)?;
    }
    match (&study.researcher, &study.supervisor) {
        (Some(r), Some(s)) => writeln!(output, "Researcher: {} | Supervisor: {}", r, s)?,
        (Some(r), None) => writeln!(output, "Researcher: {}", r)?,
        (None, Some(s)) => writeln!(output, "Supervisor: {}", s)?,
        (None, None) => {}
    }
    if let Some(ethics) = &study.ethics_reference {
        writeln!(output, "Ethics Reference: {}", ethics)?;
    }
    writeln!(
        output,
        "Confirm you are 18+ and agree to participate voluntarily."
    )?;
    Ok(())
}

fn render_menu<R: Rng, O: Write>(
    session: &Session<R>,
    verification: Option<&VerificationReport>,
    output: &mut O,
) -> Result<()> {
    rule(output)?;
    writeln!(output, "Mission Briefing")?;
    writeln!(
        output,
        "Role: Security Screening Officer | Objective: Detect prohibited items."
    )?;
    writeln!(
        output,
        "Examine the luggage and decide, based on your own judgment, whether it is safe or not."
    )?;
    writeln!(
        output,
        "TARGET THREATS (LOOK FOR THESE): {}",
        session.config().threat_items.join(" ")
    )?;
    if let Some(report) = verification {
        writeln!(output, "Verification Complete ({} trials)", report.trials)?;
        writeln!(output, "AI Reliability: {:.2}%", report.reliability() * 100.0)?;
        writeln!(output, "Threat Rate: {:.2}%", report.threat_rate() * 100.0)?;
    }
    Ok(())
}

fn render_trial<R: Rng, O: Write>(session: &mut Session<R>, output: &mut O) -> Result<()> {
    let advice = session.advise()?;
    let total = session.config().rounds;
    rule(output)?;
    writeln!(output, "Bag {}/{}", session.rounds() + 1, total)?;
    if let Some(trial) = session.current_trial() {
        writeln!(output, "[ {} ]", trial.items.join("  "))?;
    }
    match advice {
        Some(Advice::Threat) => writeln!(output, "AI ALERT: Threat Detected")?,
        Some(Advice::Clear) => writeln!(output, "AI SCAN: Bag Clear")?,
        None => writeln!(output, "AI SYSTEM OFFLINE")?,
    }
    Ok(())
}

fn render_end<R: Rng, O: Write>(
    session: &Session<R>,
    export: Option<&ExportResult>,
    output: &mut O,
) -> Result<()> {
    rule(output)?;
    writeln!(output, "Session Complete. Final Score: {}", session.score())?;
    if !session.history().is_empty() {
        writeln!(output, "Performance Report")?;
        write!(output, "{}", render_summary(&summarize(session.history())))?;
    }
    if let Some(export) = export {
        writeln!(output, "Results saved: {}", export.results_path.display())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use scan_runner::TaskConfig;
    use std::io::Cursor;

    fn temp_out(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "scan_play_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ))
    }

    fn play(script: &str, out_dir: &PathBuf) -> (Session<StdRng>, Vec<ExportResult>, String) {
        let mut session =
            Session::new(TaskConfig::default(), StdRng::seed_from_u64(17)).expect("session");
        let mut verify_rng = StdRng::seed_from_u64(18);
        let mut input = Cursor::new(script.as_bytes().to_vec());
        let mut output = Vec::new();
        let opts = PlayOptions {
            out_dir: out_dir.clone(),
            participant: Some("p07".to_string()),
            seed: Some(17),
        };
        let exports =
            run_interactive(&mut session, &mut verify_rng, &mut input, &mut output, &opts)
                .expect("interactive run");
        (session, exports, String::from_utf8(output).expect("utf8"))
    }

    #[test]
    fn manual_session_runs_to_summary_and_exports() {
        let out_dir = temp_out("manual");
        let script = format!("y\n1\n{}q\n", "c\n".repeat(10));
        let (session, exports, text) = play(&script, &out_dir);

        assert_eq!(session.phase(), Phase::Summary);
        assert_eq!(session.history().len(), 10);
        assert_eq!(exports.len(), 1);
        assert!(text.contains("AI SYSTEM OFFLINE"));
        assert!(text.contains("Bag 10/10"));
        assert!(text.contains(&format!("Final Score: {}", session.score())));

        let rows = scan_analysis::read_results_csv(&exports[0].results_path).expect("csv");
        assert_eq!(rows, session.history());
        let _ = std::fs::remove_dir_all(out_dir);
    }

    #[test]
    fn ai_mode_shows_advice_each_bag() {
        let out_dir = temp_out("ai");
        let (session, exports, text) = play("y\n2\nr\nq\n", &out_dir);
        assert_eq!(session.mode(), Mode::AiAssist);
        assert_eq!(session.rounds(), 1);
        assert!(exports.is_empty());
        let advice_lines = text
            .lines()
            .filter(|l| l.starts_with("AI ALERT") || l.starts_with("AI SCAN"))
            .count();
        assert_eq!(advice_lines, 2);
        assert!(!text.contains("AI SYSTEM OFFLINE"));
    }

    #[test]
    fn menu_verification_reports_rates() {
        let out_dir = temp_out("verify");
        let (session, _, text) = play("y\n3\nq\n", &out_dir);
        assert_eq!(session.phase(), Phase::Menu);
        assert!(text.contains("Verification Complete (10000 trials)"));
        assert!(text.contains("AI Reliability: "));
        assert!(text.contains("Threat Rate: "));
    }

    #[test]
    fn restart_returns_to_menu_with_fresh_counters() {
        let out_dir = temp_out("restart");
        let script = format!("y\n3\n1\n{}m\nq\n", "r\n".repeat(10));
        let (session, exports, text) = play(&script, &out_dir);
        assert_eq!(exports.len(), 1);
        assert_eq!(session.phase(), Phase::Menu);
        assert_eq!(session.rounds(), 0);
        assert_eq!(session.score(), 0);
        assert!(session.history().is_empty());
        // Menu shown after consent, after verifying, and after restart.
        assert_eq!(text.matches("Mission Briefing").count(), 3);
        assert_eq!(text.matches("Verification Complete").count(), 1);
        let (_, after_restart) = text
            .rsplit_once("Mission Briefing")
            .expect("menu after restart");
        assert!(!after_restart.contains("Verification Complete"));
        let _ = std::fs::remove_dir_all(out_dir);
    }

    #[test]
    fn unknown_input_and_eof_are_handled() {
        let out_dir = temp_out("eof");
        let (session, exports, text) = play("maybe\ny\nx\n", &out_dir);
        assert!(text.contains("Please answer y or q."));
        assert!(text.contains("Unknown option: x"));
        assert_eq!(session.phase(), Phase::Menu);
        assert!(exports.is_empty());
    }
}
