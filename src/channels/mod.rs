//! Front ends that carry user messages to the confirmation engine.

pub mod repl;

use std::pin::Pin;
use std::sync::Arc;

use alloy_primitives::U256;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::sync::Mutex;

use crate::agent::{Affordance, InboundSignal, Reply, Session};
use crate::bootstrap::Runtime;
use crate::chain::units;
use crate::classify::classify_operation_error;
use crate::error::ChannelError;

pub use repl::ReplChannel;

/// One message from a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub channel: String,
    pub user_id: String,
    pub content: String,
    /// Set when the message is a button press rather than typed text.
    pub callback: Option<String>,
}

impl IncomingMessage {
    pub fn new(channel: &str, user_id: &str, content: &str) -> Self {
        Self {
            channel: channel.to_string(),
            user_id: user_id.to_string(),
            content: content.to_string(),
            callback: None,
        }
    }

    pub fn callback(channel: &str, user_id: &str, token: &str) -> Self {
        Self {
            callback: Some(token.to_string()),
            ..Self::new(channel, user_id, token)
        }
    }

    pub fn signal(&self) -> InboundSignal {
        match &self.callback {
            Some(token) => InboundSignal::Callback(token.clone()),
            None => InboundSignal::Text(self.content.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingResponse {
    /// Markdown.
    pub content: String,
    pub affordances: Vec<Affordance>,
}

impl OutgoingResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            affordances: Vec::new(),
        }
    }
}

impl From<&Reply> for OutgoingResponse {
    fn from(reply: &Reply) -> Self {
        Self {
            content: reply.text.clone(),
            affordances: reply.affordances.clone(),
        }
    }
}

pub type MessageStream = Pin<Box<dyn Stream<Item = IncomingMessage> + Send>>;

#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    /// Begin receiving messages.
    async fn start(&self) -> Result<MessageStream, ChannelError>;

    async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError>;
}

const NOT_UNDERSTOOD: &str = "I can check balances, send ETH, and mint, list, buy, stake, \
     unstake, borrow against or repay NFTs. Try `send 0.1 eth to 0x...` or `/help`.";

/// Pump `channel` until it closes or the user quits.
pub async fn serve(
    channel: &dyn Channel,
    runtime: &Runtime,
    session_id: &str,
) -> Result<(), ChannelError> {
    let mut stream = channel.start().await?;
    let session = runtime.sessions.get_or_create_session(session_id).await;
    tracing::info!(channel = channel.name(), session = session_id, "channel started");

    while let Some(msg) = stream.next().await {
        let content = msg.content.trim();
        if msg.callback.is_none() && matches!(content, "/quit" | "/exit") {
            break;
        }

        let response = match content.strip_prefix('/') {
            Some(command) if msg.callback.is_none() => {
                run_command(runtime, &session, command).await
            }
            _ => converse(runtime, &session, session_id, &msg).await,
        };
        channel.respond(&msg, response).await?;
    }

    tracing::info!(channel = channel.name(), session = session_id, "channel closed");
    Ok(())
}

async fn converse(
    runtime: &Runtime,
    session: &Arc<Mutex<Session>>,
    session_id: &str,
    msg: &IncomingMessage,
) -> OutgoingResponse {
    let signal = msg.signal();
    if let InboundSignal::Text(text) = &signal {
        runtime.history.record_user(session_id, text).await;
    }
    match runtime.engine.handle(session, &signal).await {
        Some(reply) => {
            runtime.history.record_reply(session_id, &reply).await;
            OutgoingResponse::from(&reply)
        }
        None => OutgoingResponse::text(NOT_UNDERSTOOD),
    }
}

/// Read-only slash commands.
async fn run_command(
    runtime: &Runtime,
    session: &Arc<Mutex<Session>>,
    command: &str,
) -> OutgoingResponse {
    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or_default().to_lowercase();
    let id = parts
        .next()
        .and_then(|raw| U256::from_str_radix(raw.trim_start_matches('#'), 10).ok());
    let ops = &runtime.operations;

    let rendered = match (name.as_str(), id) {
        ("address", _) => Ok(format!("Account: `{}`", ops.address())),
        ("pending", _) => {
            let state = session.lock().await;
            let pending = state.pending_requests();
            if pending.is_empty() {
                Ok("Nothing is waiting for confirmation.".to_string())
            } else {
                Ok(pending
                    .iter()
                    .map(|request| {
                        format!(
                            "- **{}** ({}): {}",
                            request.kind,
                            request.created_at.format("%H:%M:%S"),
                            request.request.describe()
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
        }
        ("listing", Some(token_id)) => ops.listing(token_id).await.map(|listing| {
            if listing.active {
                format!(
                    "NFT #{token_id} is listed by `{}` for {} ETH.",
                    listing.seller,
                    units::format_ether(listing.price)
                )
            } else {
                format!("NFT #{token_id} is not listed.")
            }
        }),
        ("stake", Some(token_id)) => ops.stake_info(token_id).await.map(|record| {
            if record.is_staked() {
                format!(
                    "NFT #{token_id} is staked by `{}` since {} with {} ETH in rewards.",
                    record.staker,
                    record.started_at,
                    units::format_ether(record.rewards)
                )
            } else {
                format!("NFT #{token_id} is not staked.")
            }
        }),
        ("loan", Some(loan_id)) => ops.loan(loan_id).await.map(|loan| {
            if !loan.exists() {
                format!("Loan #{loan_id} does not exist.")
            } else {
                format!(
                    "Loan #{loan_id}: {} ETH against NFT #{}, borrower `{}`, due {}, {}.",
                    units::format_ether(loan.amount),
                    loan.token_id,
                    loan.borrower,
                    loan.due_date,
                    if loan.repaid { "repaid" } else { "outstanding" }
                )
            }
        }),
        ("listing" | "stake" | "loan", None) => Ok(format!("Usage: `/{name} <id>`")),
        _ => Ok(format!("Unknown command `/{name}`. Try `/help`.")),
    };

    match rendered {
        Ok(text) => OutgoingResponse::text(text),
        Err(error) => {
            OutgoingResponse::text(classify_operation_error(&error, "Lookup").user_message)
        }
    }
}
