pub mod connection;
mod ledger;

pub use connection::{AuthorizationState, ConnectionState};
pub use ledger::{ACK_WINDOW, CommandLedger, MAX_AWAITING_ACK, TrackedCommand};
