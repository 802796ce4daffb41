//! Interactive terminal channel — a line-based adapter over stdin/stdout.
//!
//! Proves the channel contract end-to-end without any external transport:
//! inbound context per line, outbound pipeline before printing, delivery
//! and status callbacks wired so sub-agent results and compaction notices
//! show up inline.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use aster_agent::Agent;
use aster_comm::{process_outbound, split_message, InboundContext, OutboundMessage};

const PLATFORM: &str = "terminal";
const CHAT_ID: &str = "local";
const OPERATOR_ID: &str = "operator";
const MAX_CHUNK: usize = 4000;

pub async fn run(agent: Arc<Agent>) -> anyhow::Result<()> {
    // Sub-agent results and scheduler replies print like any other output.
    {
        let sender: aster_agent::OutboundSender = Arc::new(
            move |_platform: String, _chat_id: String, message: OutboundMessage| {
                print_processed(&message.text);
            },
        );
        agent.ctx.set_outbound_sender(sender);
    }
    agent
        .conversations()
        .set_delivery_callback(Arc::new(|message, _parent_session_id| {
            print_processed(&message);
        }));
    agent
        .conversations()
        .set_status_callback(Arc::new(|_session_id, message| {
            println!("· {message}");
        }));

    println!("aster terminal — /clear starts fresh, /cancel stops a turn, /quit exits");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }

        match text {
            "/quit" | "/exit" => break,
            "/cancel" => {
                let cancelled = agent.cancel(PLATFORM, CHAT_ID);
                println!(
                    "· {}",
                    if cancelled { "cancelled" } else { "nothing running" }
                );
                continue;
            }
            "/clear" => {
                match agent.clear_session(PLATFORM, CHAT_ID).await {
                    Ok(msg) => println!("· {msg}"),
                    Err(e) => warn!(error = %e, "clear failed"),
                }
                continue;
            }
            _ => {}
        }

        let mut inbound = InboundContext::direct(PLATFORM, CHAT_ID);
        inbound.sender_id = Some(OPERATOR_ID.to_string());
        inbound.sender_name = Some("operator".to_string());

        let reply = agent
            .handle_message(inbound, "operator", text, Vec::new())
            .await;
        if !reply.is_empty() {
            print_processed(&reply);
        }
    }

    Ok(())
}

fn print_processed(raw: &str) {
    let (text, media) = process_outbound(raw);
    for chunk in split_message(&text, MAX_CHUNK) {
        println!("{chunk}");
    }
    if let Some(path) = media {
        println!("[attachment: {path}]");
    }
}
