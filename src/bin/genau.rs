//! Terminal front end for the practice engine
//!
//! Each typed line stands in for one spoken sentence. Lines starting with
//! `/` are commands; `/help` lists them.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use genau::providers::{FeedTranscriptionProvider, HttpCoachingProvider, TracingSpeechOutput};
use genau::{
    CoachConfig, CoordinatorReply, EngineEvent, EnginePorts, PracticeEngine, SessionCoordinator,
    Storage, Topic, UiCommand, logging,
};

const HELP: &str = "\
Type a sentence to practise it. Commands:
  /swap            swap source and target language
  /topic <name>    choose a topic (Daily Life, Shopping, Job Interview, Free Conversation)
  /stats           show XP, streak and recent turns
  /leaderboard     show the top scores
  /quit            exit";

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let storage = Arc::new(Storage::open_default().context("Failed to open progress store")?);
    let config = CoachConfig::resolve(&storage).context("Invalid coach configuration")?;
    let coach = Arc::new(HttpCoachingProvider::new(&config)?);
    let transcription = Arc::new(FeedTranscriptionProvider::new());

    let engine = PracticeEngine::new(
        Arc::clone(&storage),
        EnginePorts {
            transcription: transcription.clone(),
            coach: coach.clone(),
            speech: Arc::new(TracingSpeechOutput::new()),
        },
    )?;
    let coordinator = SessionCoordinator::new(engine.clone());

    let mut events = engine.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(n)) => eprintln!("(missed {n} events)"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let snapshot = engine.snapshot();
    println!(
        "Genau - {} -> {} - topic {} - coach {}",
        snapshot.languages.source(),
        snapshot.languages.target(),
        snapshot.topic,
        coach.base_url()
    );
    println!(
        "XP {} - streak {} days",
        snapshot.ledger.xp_total, snapshot.ledger.streak_days
    );
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Some(command) = line.strip_prefix('/') else {
            speak(&coordinator, &transcription, line)?;
            continue;
        };

        let (name, arg) = command.split_once(' ').unwrap_or((command, ""));
        match name {
            "quit" | "exit" => break,
            "help" => println!("{HELP}"),
            "swap" => report(coordinator.handle(UiCommand::SwapLanguages)),
            "topic" if !arg.trim().is_empty() => {
                report(coordinator.handle(UiCommand::SelectTopic(Topic::parse(arg))))
            }
            "topic" => {
                for topic in Topic::all() {
                    println!("  {topic}");
                }
            }
            "stats" => {
                let ledger = engine.ledger();
                println!(
                    "XP {} - streak {} days - {} turns - best score {}",
                    ledger.xp_total,
                    ledger.streak_days,
                    storage.get_turn_count()?,
                    storage
                        .get_best_score()?
                        .map_or_else(|| "-".to_string(), |s| s.to_string())
                );
                for turn in engine.recent_turns(5)? {
                    println!(
                        "  [{}] {} ({})",
                        turn.created_at.format("%Y-%m-%d %H:%M"),
                        turn.transcript,
                        turn.scores.display_total()
                    );
                }
            }
            "leaderboard" => match coach.fetch_leaderboard(10).await {
                Ok(entries) => {
                    for (rank, entry) in entries.iter().enumerate() {
                        println!(
                            "  {:>2}. {} ({}) {}",
                            rank + 1,
                            entry.name,
                            entry.location,
                            entry.top_score
                        );
                    }
                }
                Err(e) => eprintln!("Leaderboard unavailable: {e}"),
            },
            other => eprintln!("Unknown command /{other}, try /help"),
        }
    }

    Ok(())
}

/// Run one turn with `text` as the recognized speech
fn speak(
    coordinator: &SessionCoordinator,
    transcription: &FeedTranscriptionProvider,
    text: &str,
) -> Result<()> {
    match coordinator.handle(UiCommand::MicPressed) {
        CoordinatorReply::Recording { .. } => {}
        other => {
            report(other);
            return Ok(());
        }
    }

    let feed = transcription
        .feed()
        .context("Transcription session closed unexpectedly")?;
    feed.partial(text);
    feed.finish(text);
    Ok(())
}

fn report(reply: CoordinatorReply) {
    match reply {
        CoordinatorReply::LanguagesSwapped { languages } => {
            println!("Now practising {} -> {}", languages.source(), languages.target())
        }
        CoordinatorReply::TopicSelected { topic } => println!("Topic: {topic}"),
        CoordinatorReply::Rejected { message } | CoordinatorReply::Failed { message } => {
            eprintln!("{message}")
        }
        CoordinatorReply::NothingHeard => println!("Nothing heard"),
        _ => {}
    }
}

fn print_event(event: &EngineEvent) {
    match event {
        EngineEvent::FeedbackReady { feedback, .. } => {
            println!("Coach: {}", feedback.reply);
            if let Some(correction) = &feedback.correction {
                println!("  Correction: {correction}");
            }
            if let Some(tip) = &feedback.pronunciation_tip {
                println!("  Pronunciation: {tip}");
            }
            println!(
                "  Score {} (grammar {}, pronunciation {}) +{} XP",
                feedback.scores.display_total(),
                feedback.scores.display_grammar(),
                feedback.scores.display_pronunciation(),
                feedback.xp_awarded
            );
            if feedback.should_repeat {
                println!("  Try saying it again!");
            }
        }
        EngineEvent::LedgerUpdated { ledger } => {
            println!("  XP {} - streak {} days", ledger.xp_total, ledger.streak_days)
        }
        EngineEvent::TurnFailed { message, .. } => eprintln!("Error: {message}"),
        EngineEvent::StreakReset { last_activity } => {
            println!("Streak reset, last practice was {last_activity}")
        }
        EngineEvent::StateChanged { .. } | EngineEvent::TranscriptUpdated { .. } => {}
    }
}
