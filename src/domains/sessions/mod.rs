pub mod entity;
pub mod manager;

pub use entity::{CreateSessionParams, SessionKind, SessionSummary};
pub use manager::{
    Session, SessionAttachment, SessionManager, CONTINUE_FLAG, IDLE_TIMEOUT, MAX_SCROLLBACK_BYTES,
};
