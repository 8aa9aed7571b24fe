//! Minimal terminal front end.
//!
//! Restores the stored session (or logs in with `VESTNIK_HANDLE` /
//! `VESTNIK_PASSWORD`), focuses one group (`VESTNIK_GROUP`, by id or name,
//! defaulting to the first) and sends each stdin line as a message.
//! `/retry` resends failed messages, `/quit` exits.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use vestnik_client::{ChatClient, ClientConfig, ClientEvent, DeliveryState, LogEntry};
use vestnik_shared::constants::APP_NAME;
use vestnik_shared::{Group, GroupId, Identity, MessageId};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    vestnik_client::init_tracing();

    let config = ClientConfig::from_env();
    info!(server = %config.server_url, "Starting {APP_NAME} terminal client v{}", env!("CARGO_PKG_VERSION"));

    let client = Arc::new(ChatClient::from_config(config)?);
    let me = establish_session(&client).await?;
    println!("Logged in as {} (@{})", me.display_name, me.handle);

    let group = pick_group(&client).await?;
    println!("== {} ==", group.name);
    client.focus_conversation(group.id)?;

    let printer = tokio::spawn(print_updates(client.clone(), group.id));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => continue,
            "/quit" => break,
            "/retry" => retry_failed(&client, group.id).await,
            text => {
                if let Err(e) = client.send_message(group.id, text).await {
                    println!("! not sent: {e} (type /retry to resend)");
                }
            }
        }
    }

    client.scheduler().stop_all();
    printer.abort();
    info!("Bye");
    Ok(())
}

async fn establish_session(client: &ChatClient) -> anyhow::Result<Identity> {
    if let Some(me) = client.restore_session() {
        return Ok(me);
    }

    let handle = std::env::var("VESTNIK_HANDLE")
        .context("No stored session and VESTNIK_HANDLE is not set")?;
    let password =
        std::env::var("VESTNIK_PASSWORD").context("VESTNIK_PASSWORD is not set")?;
    Ok(client.login(&handle, &password).await?)
}

async fn pick_group(client: &ChatClient) -> anyhow::Result<Group> {
    let groups = client.groups().await?;
    if groups.is_empty() {
        bail!("You are not a member of any group yet");
    }

    for group in &groups {
        println!("  [{}] {} ({} members)", group.id, group.name, group.member_count);
    }

    let Ok(wanted) = std::env::var("VESTNIK_GROUP") else {
        return Ok(groups[0].clone());
    };
    let wanted = wanted.trim();
    let by_id = wanted.parse::<i64>().ok().map(GroupId);

    groups
        .into_iter()
        .find(|g| Some(g.id) == by_id || g.name.eq_ignore_ascii_case(wanted))
        .with_context(|| format!("No group matching {wanted:?}"))
}

async fn retry_failed(client: &ChatClient, group_id: GroupId) {
    let failed = client.failed_messages(group_id);
    if failed.is_empty() {
        println!("Nothing to retry");
        return;
    }
    for message in failed {
        if let Err(e) = client.retry_send(group_id, message.id).await {
            println!("! retry failed: {e}");
        }
    }
}

async fn print_updates(client: Arc<ChatClient>, group_id: GroupId) {
    let mut events = client.subscribe();
    let mut printed: HashSet<MessageId> = HashSet::new();

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event consumer lagging");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        if event.group_id() != group_id {
            continue;
        }

        match event {
            ClientEvent::DeliveryFailed { placeholder, .. } => {
                println!("! message {placeholder} was not delivered (type /retry to resend)");
            }
            ClientEvent::PollFailed { .. } => {}
            ClientEvent::ConversationUpdated { .. } | ClientEvent::DeliveryConfirmed { .. } => {
                for entry in client.messages(group_id) {
                    if entry.state == DeliveryState::Confirmed && printed.insert(entry.message.id) {
                        println!("{}", render(&entry));
                    }
                }
            }
        }
    }
}

fn render(entry: &LogEntry) -> String {
    let m = &entry.message;
    format!(
        "[{}] {}: {}",
        m.created_at.format("%H:%M"),
        m.author_display_name,
        m.text
    )
}
