//! bean-voice-daemon: voice command engine for the Delightful Bean storefront
//!
//! The daemon owns:
//! - The recognition session state machine and command grammar
//! - Speech capture and synthesis arbitration behind backend seams
//! - An IPC server the host UI uses to press the activation control and
//!   receive state notifications
//!
//! The page-side glue (menus, scrolling, forms) stays in the host; only the
//! voice interaction engine lives here. Console backends stand in for the
//! platform speech services, so the daemon can be exercised from a terminal:
//! activate over IPC, then type an utterance (a blank line is silence).

mod assistant;
mod config;
mod events;
mod grammar;
mod ipc;
mod lifecycle;
mod speech;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::assistant::VoiceAssistantController;
use crate::config::Config;
use crate::events::{AssistantEvent, IntentDispatch};
use crate::grammar::{CommandGrammar, CommandRule, GrammarError};
use crate::ipc::{Notification, Server};
use crate::lifecycle::ShutdownSignal;
use crate::speech::{
    ConsoleRecognizer, ConsoleSynthesizer, SpeechInputChannel, SpeechOutputChannel,
};

/// Commands the storefront understands, in priority order
fn storefront_grammar() -> Result<CommandGrammar, GrammarError> {
    CommandGrammar::new(vec![
        CommandRule::new(
            "SHOW_SPECIALS",
            ["special", "specials"],
            Some("Today's special is the honey lavender latte."),
        ),
        CommandRule::new(
            "SHOW_HOURS",
            ["hours", "open", "closing"],
            Some("We're open nine to five, seven days a week."),
        ),
        CommandRule::new(
            "SHOW_MENU",
            ["menu", "drinks", "coffee"],
            Some("Our menu has espresso drinks, teas, and fresh pastries. Scrolling there now."),
        ),
        CommandRule::new(
            "SHOW_LOCATION",
            ["where", "location", "address"],
            Some("We're at the corner of Fifth and Main."),
        ),
        CommandRule::new(
            "START_ORDER",
            ["order", "pickup"],
            Some("Taking you to online ordering."),
        ),
        CommandRule::new(
            "SHOW_WIFI",
            ["wifi", "internet"],
            Some("The wifi password is printed on your receipt."),
        ),
        CommandRule::new(
            "GREETING",
            ["hello", "hey bean"],
            Some("Hi there! Ask me about our hours, menu, or location."),
        ),
    ])
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "bean-voice-daemon starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.socket_path, "configuration loaded");

    // A bad grammar must fail startup, not mis-dispatch at runtime
    let grammar = storefront_grammar()?;
    info!(rules = grammar.len(), "command grammar loaded");

    // Create shutdown signal handler
    let mut shutdown = ShutdownSignal::new()?;

    // Create channels for inter-component communication
    // IPC server -> controller (activation control)
    let (control_tx, control_rx) = mpsc::channel(32);
    // Speech channels -> controller (capture and synthesis events)
    let (input_tx, input_rx) = mpsc::channel(32);
    let (output_tx, output_rx) = mpsc::channel(32);
    // Controller -> host UI (state notices)
    let (notice_tx, mut notice_rx) = broadcast::channel::<AssistantEvent>(64);
    // Controller -> host intent sink (matched commands)
    let (intent_tx, mut intent_rx) = mpsc::channel::<IntentDispatch>(32);

    // Console backends stand in for the platform speech services; a build
    // targeting a real recognizer plugs in at these two seams.
    let input = SpeechInputChannel::new(Some(Box::new(ConsoleRecognizer::spawn())), input_tx);
    let output = SpeechOutputChannel::new(Some(Box::new(ConsoleSynthesizer::spawn())), output_tx);

    let recognition_supported = input.is_supported();
    let synthesis_supported = output.is_supported();

    let mut controller =
        VoiceAssistantController::new(grammar, input, output, notice_tx.clone(), intent_tx);

    // Create IPC server wired to the controller
    let server = Server::new(&config.socket_path, control_tx)?;
    server
        .set_capabilities(recognition_supported, synthesis_supported)
        .await;
    let server_for_events = &server;

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the controller (processes activation requests and channel events)
        _ = controller.run(control_rx, input_rx, output_rx) => {
            info!("controller exited");
        }

        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Relay engine notices to the IPC server and its subscribers
        _ = async {
            loop {
                match notice_rx.recv().await {
                    Ok(event) => {
                        if let AssistantEvent::StateChanged { state } = &event {
                            server_for_events.set_state(*state).await;
                        }
                        server_for_events.publish(Notification::from(event));
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "notice receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        } => {
            info!("notice forwarder exited");
        }

        // Relay matched commands to the host
        _ = async {
            while let Some(dispatch) = intent_rx.recv().await {
                info!(
                    intent = %dispatch.intent,
                    transcript = %dispatch.transcript,
                    "command recognized"
                );
                server_for_events.publish(Notification::Command {
                    intent: dispatch.intent,
                    transcript: dispatch.transcript,
                });
            }
        } => {
            info!("intent sink exited");
        }

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    server.shutdown().await;

    info!("bean-voice-daemon stopped");

    Ok(())
}
