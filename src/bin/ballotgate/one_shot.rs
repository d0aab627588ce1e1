//! Non-interactive run: sign in, enroll if needed, verify, check liveness, vote.

use anyhow::{bail, Result};
use ballotgate::config::AppConfig;
use ballotgate::flow::{Progress, StepError, StepReport, VotingSession};
use ballotgate::session::Step;
use ballotgate::vision::CancelToken;

pub(crate) fn run(mut session: VotingSession, config: &AppConfig, user: &str) -> Result<()> {
    let cancel = CancelToken::new();
    let mut progress = |p: Progress| print_progress(&p);

    report(session.authenticate(user)?);
    if session.step() == Step::Enroll {
        report(session.enroll(&cancel, &mut progress)?);
    }

    match session.verify(&cancel, &mut progress) {
        Ok(step) => report(step),
        Err(StepError::NoReference) => {
            println!("stored template unusable; enrolling again");
            report(session.enroll(&cancel, &mut progress)?);
            report(session.verify(&cancel, &mut progress)?);
        }
        Err(err) => return Err(err.into()),
    }
    report(session.check_liveness(&cancel, &mut progress)?);

    let (Some(election), Some(option)) = (config.election.as_deref(), config.option.as_deref())
    else {
        println!("verified; pass --election and --option to cast a vote");
        for election in session.list_elections()? {
            println!("  open election: {} ({})", election.id, election.title);
        }
        return Ok(());
    };
    match session.cast_vote(election, option) {
        Ok(step) => {
            report(step);
            println!("vote recorded: {election} -> {option}");
            Ok(())
        }
        Err(StepError::AlreadyVoted { election_id }) => {
            bail!("voter {user} has already voted in election {election_id}")
        }
        Err(err) => Err(err.into()),
    }
}

fn report(report: StepReport) {
    if report.from != report.step {
        println!("step: {} -> {}", report.from, report.step);
    }
    for notice in report.notices {
        println!("[{}] {}", notice.level.label(), notice.message);
    }
}

fn print_progress(progress: &Progress) {
    match progress {
        Progress::Pose {
            index,
            total,
            attempt,
            prompt,
            ..
        } => println!("pose {}/{total} (attempt {attempt}): {prompt}", index + 1),
        Progress::VerifyAttempt {
            attempts,
            max_attempts,
            distance: Some(distance),
        } => println!("verify attempt {attempts}/{max_attempts}: distance {distance:.3}"),
        Progress::VerifyAttempt { .. } => {}
        Progress::Blink { count, required } => println!("blink {count}/{required}"),
        Progress::Settling { ms } => println!("liveness confirmed, settling {ms}ms"),
    }
}
