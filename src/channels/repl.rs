//! Interactive REPL channel with line editing and markdown rendering.
//!
//! Uses rustyline for line editing, history, and tab-completion.
//! Uses termimad for rendering markdown replies inline.
//!
//! ## Commands
//!
//! - `/help` - Show available commands
//! - `/quit` or `/exit` - Exit the REPL
//! - `/pending` - Show requests waiting for confirmation
//! - `/listing <id>`, `/stake <id>`, `/loan <id>` - Read NFT state
//! - `/address` - Show the signing account
//! - `!<token>` - Press a button offered with the last reply
//! - `yes`/`no` - Confirm or cancel the most recent pending request

use std::borrow::Cow;

use async_trait::async_trait;
use rustyline::completion::Completer;
use rustyline::config::Config;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{CompletionType, Editor, Helper};
use termimad::MadSkin;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::agent::{Affordance, HexToken, scan_hex_tokens};
use crate::channels::{Channel, IncomingMessage, MessageStream, OutgoingResponse};
use crate::error::ChannelError;

/// Slash commands available in the REPL.
const SLASH_COMMANDS: &[&str] = &[
    "/help", "/quit", "/exit", "/pending", "/listing", "/stake", "/loan", "/address",
];

/// Prefix that turns a typed line into a button press.
const CALLBACK_PREFIX: char = '!';

/// Rustyline helper for slash-command tab completion.
struct ReplHelper;

impl Completer for ReplHelper {
    type Candidate = String;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<String>)> {
        if !line.starts_with('/') {
            return Ok((0, vec![]));
        }

        let prefix = &line[..pos];
        let matches: Vec<String> = SLASH_COMMANDS
            .iter()
            .filter(|cmd| cmd.starts_with(prefix))
            .map(|cmd| cmd.to_string())
            .collect();

        Ok((0, matches))
    }
}

impl Hinter for ReplHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> Option<String> {
        if !line.starts_with('/') || pos < line.len() {
            return None;
        }

        SLASH_COMMANDS
            .iter()
            .find(|cmd| cmd.starts_with(line) && **cmd != line)
            .map(|cmd| cmd[line.len()..].to_string())
    }
}

impl Highlighter for ReplHelper {
    fn highlight_hint<'h>(&self, hint: &'h str) -> Cow<'h, str> {
        Cow::Owned(format!("\x1b[90m{hint}\x1b[0m"))
    }
}

impl Validator for ReplHelper {}
impl Helper for ReplHelper {}

/// Build a termimad skin with our color scheme.
fn make_skin() -> MadSkin {
    let mut skin = MadSkin::default();
    skin.set_headers_fg(termimad::crossterm::style::Color::Yellow);
    skin.bold.set_fg(termimad::crossterm::style::Color::White);
    skin.italic
        .set_fg(termimad::crossterm::style::Color::Magenta);
    skin.inline_code
        .set_fg(termimad::crossterm::style::Color::Green);
    skin.code_block
        .set_fg(termimad::crossterm::style::Color::Green);
    skin.code_block.left_margin = 2;
    skin
}

/// REPL channel with line editing and markdown rendering.
pub struct ReplChannel {
    user_id: String,
    /// Optional single message to send (for -m flag).
    single_message: Option<String>,
}

impl ReplChannel {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            single_message: None,
        }
    }

    /// Create a REPL channel that sends a single message and exits.
    pub fn with_message(user_id: impl Into<String>, message: String) -> Self {
        Self {
            user_id: user_id.into(),
            single_message: Some(message),
        }
    }
}

fn print_help() {
    let h = "\x1b[1m"; // bold (section headers)
    let c = "\x1b[1;36m"; // bold cyan (commands)
    let d = "\x1b[90m"; // dim gray (descriptions)
    let r = "\x1b[0m"; // reset

    println!();
    println!("  {h}chainpilot{r}");
    println!();
    println!("  {h}Commands{r}");
    println!("  {c}/help{r}              {d}show this help{r}");
    println!("  {c}/pending{r}           {d}requests waiting for confirmation{r}");
    println!("  {c}/listing <id>{r}      {d}marketplace listing of an NFT{r}");
    println!("  {c}/stake <id>{r}        {d}staking record of an NFT{r}");
    println!("  {c}/loan <id>{r}         {d}loan details{r}");
    println!("  {c}/address{r}           {d}signing account{r}");
    println!("  {c}/quit{r} {c}/exit{r}        {d}exit the repl{r}");
    println!();
    println!("  {h}Requests{r}");
    println!("  {c}balance{r}            {d}balance of your account, an address or a key{r}");
    println!("  {c}send 0.1 eth to 0x..{r} {d}transfer ETH{r}");
    println!("  {c}mint / list / buy{r}  {d}NFT marketplace{r}");
    println!("  {c}stake / unstake{r}    {d}NFT staking{r}");
    println!("  {c}borrow / repay{r}     {d}NFT-backed loans{r}");
    println!();
    println!("  {h}Confirmation{r}");
    println!("  {c}yes{r} ({c}y{r})            {d}run the most recent pending request{r}");
    println!("  {c}no{r} ({c}n{r})             {d}cancel it{r}");
    println!("  {c}!confirm:<kind>{r}    {d}press an offered button{r}");
    println!();
}

/// Lines holding a private key stay out of the history file.
fn is_history_safe(line: &str) -> bool {
    !scan_hex_tokens(line)
        .iter()
        .any(|token| matches!(token, HexToken::PrivateKey(_)))
}

/// `!token` presses a button; anything else is typed text.
fn parse_line(user_id: &str, line: &str) -> IncomingMessage {
    match line.strip_prefix(CALLBACK_PREFIX).map(str::trim) {
        Some(token) if !token.is_empty() => IncomingMessage::callback("repl", user_id, token),
        _ => IncomingMessage::new("repl", user_id, line),
    }
}

fn render_affordances(affordances: &[Affordance]) -> String {
    affordances
        .iter()
        .map(|a| format!("\x1b[1;36m[{}]\x1b[0m \x1b[90m!{}\x1b[0m", a.label, a.token))
        .collect::<Vec<_>>()
        .join("  ")
}

/// Get the history file path (~/.chainpilot/history).
fn history_path() -> std::path::PathBuf {
    crate::bootstrap::chainpilot_dir().join("history")
}

#[async_trait]
impl Channel for ReplChannel {
    fn name(&self) -> &str {
        "repl"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = mpsc::channel(32);
        let single_message = self.single_message.clone();
        let user_id = self.user_id.clone();

        let config = Config::builder()
            .history_ignore_dups(true)
            .map_err(|e| ChannelError::StartupFailed {
                name: "repl".to_string(),
                reason: e.to_string(),
            })?
            .auto_add_history(false)
            .completion_type(CompletionType::List)
            .build();

        std::thread::spawn(move || {
            if let Some(msg) = single_message {
                let _ = tx.blocking_send(parse_line(&user_id, &msg));
                let _ = tx.blocking_send(IncomingMessage::new("repl", &user_id, "/quit"));
                return;
            }

            let mut rl: Editor<ReplHelper, DefaultHistory> = match Editor::with_config(config) {
                Ok(editor) => editor,
                Err(e) => {
                    eprintln!("Failed to initialize line editor: {e}");
                    return;
                }
            };

            rl.set_helper(Some(ReplHelper));

            let hist_path = history_path();
            if let Some(parent) = hist_path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let _ = rl.load_history(&hist_path);

            println!("\x1b[1mchainpilot\x1b[0m  /help for commands, /quit to exit");
            println!();

            loop {
                match rl.readline("\x1b[1;36m\u{203A}\x1b[0m ") {
                    Ok(line) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        if is_history_safe(line) {
                            let _ = rl.add_history_entry(line);
                        }

                        if line.eq_ignore_ascii_case("/help") {
                            print_help();
                            continue;
                        }

                        if tx.blocking_send(parse_line(&user_id, line)).is_err() {
                            break;
                        }
                    }
                    Err(ReadlineError::Interrupted) => {
                        println!("\x1b[90m^C (use /quit to exit)\x1b[0m");
                    }
                    Err(ReadlineError::Eof) => {
                        // Ctrl+D
                        let _ = tx.blocking_send(IncomingMessage::new("repl", &user_id, "/quit"));
                        break;
                    }
                    Err(e) => {
                        eprintln!("Input error: {e}");
                        break;
                    }
                }
            }

            let _ = rl.save_history(&hist_path);
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn respond(
        &self,
        _msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        let width = crossterm::terminal::size()
            .map(|(w, _)| w as usize)
            .unwrap_or(80);

        let sep_width = width.min(80);
        eprintln!("\x1b[90m{}\x1b[0m", "\u{2500}".repeat(sep_width));

        let skin = make_skin();
        let text = termimad::FmtText::from(&skin, &response.content, Some(width));
        print!("{text}");

        if !response.affordances.is_empty() {
            println!("  {}", render_affordances(&response.affordances));
        }
        println!();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::InboundSignal;

    #[test]
    fn bang_prefix_becomes_callback() {
        let msg = parse_line("alice", "!confirm:transfer");
        assert_eq!(msg.callback.as_deref(), Some("confirm:transfer"));
        assert_eq!(
            msg.signal(),
            InboundSignal::Callback("confirm:transfer".to_string())
        );

        let msg = parse_line("alice", "send 1 eth");
        assert_eq!(msg.callback, None);
        assert_eq!(msg.user_id, "alice");

        // A lone bang is just text.
        assert_eq!(parse_line("alice", "!").callback, None);
    }

    #[test]
    fn private_keys_stay_out_of_history() {
        let key = format!("balance of 0x{}", "ab".repeat(32));
        assert!(!is_history_safe(&key));
        assert!(is_history_safe(
            "send 1 eth to 0x00000000000000000000000000000000000000aa"
        ));
    }

    #[test]
    fn completion_knows_every_command() {
        for cmd in ["/pending", "/listing", "/stake", "/loan", "/address"] {
            assert!(SLASH_COMMANDS.contains(&cmd));
        }
    }

    #[test]
    fn affordances_render_as_bang_tokens() {
        let rendered = render_affordances(&[Affordance {
            label: "Confirm".to_string(),
            token: "confirm:nft".to_string(),
        }]);
        assert!(rendered.contains("[Confirm]"));
        assert!(rendered.contains("!confirm:nft"));
    }
}
