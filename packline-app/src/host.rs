//! Terminal front end: forwards session events to the console and maps
//! keyboard input onto session actions.
//!
//! Controls: `n` next item, `r` repeat, `b` step back, `q` quit.

use std::io::BufRead;
use std::sync::Arc;

use anyhow::Result;
use packline_core::{PackSession, SessionPhase};
use tracing::{info, warn};

pub async fn run_console(session: Arc<PackSession>) -> Result<()> {
    let mut status_rx = session.subscribe_status();
    let mut step_rx = session.subscribe_steps();
    let mut heard_rx = session.subscribe_heard();

    let status_task = tokio::spawn(async move {
        while let Ok(event) = status_rx.recv().await {
            match (&event.fault, &event.detail) {
                (Some(fault), Some(detail)) => {
                    println!("! {:?}: {detail}", fault);
                }
                (Some(fault), None) => println!("! {:?}", fault),
                _ => println!("· phase: {:?}", event.phase),
            }
        }
    });

    let step_task = tokio::spawn(async move {
        while let Ok(event) = step_rx.recv().await {
            println!(
                "▶ [{}/{}] {}  ({} of {} items packed)",
                event.index + 1,
                event.total,
                event.step.spoken_phrase(),
                event.completed_items,
                event.total_items,
            );
        }
    });

    let heard_task = tokio::spawn(async move {
        while let Ok(event) = heard_rx.recv().await {
            if event.is_final {
                println!("  heard: “{}”", event.text);
            }
        }
    });

    println!("Controls: [n]ext  [r]epeat  [b]ack  [q]uit");

    // Blocking stdin reader; ends on `q` or EOF.
    let control_session = Arc::clone(&session);
    tokio::task::spawn_blocking(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let done = control_session.phase() == SessionPhase::Idle;
            if done {
                break;
            }
            let result = match line.trim() {
                "n" | "next" => control_session.advance(),
                "r" | "repeat" => control_session.repeat(),
                "b" | "back" => control_session.step_backward(),
                "q" | "quit" => break,
                "" => continue,
                other => {
                    println!("unknown control {other:?}");
                    continue;
                }
            };
            if let Err(e) = result {
                warn!(error = %e, "control rejected");
            }
        }
    })
    .await?;

    info!("console loop ended");
    status_task.abort();
    step_task.abort();
    heard_task.abort();
    Ok(())
}
