//! Conversational front of the operation executors: confirmation prompts,
//! accept/reject handling, and pending-state recovery.

pub mod engine;
pub mod extract;
pub mod history;
pub mod pending;
pub mod signal;

pub use engine::{ConfirmationConfig, ConfirmationEngine};
pub use extract::{HexToken, ParameterExtractor, detect_trigger, scan_hex_tokens};
pub use history::{ConversationHistory, HistoryMessage, InMemoryHistory, Role, recover_pending};
pub use pending::{PendingKind, PendingRequest, Session, SessionManager};
pub use signal::{Affordance, CallbackToken, Decision, InboundSignal, NormalizedInput, Reply};
