//! Bridge server implementation

pub mod auth;
pub mod lifecycle;
mod router;
mod server;
pub mod streaming;

pub use auth::{BearerAuth, bearer_auth_middleware};
pub use lifecycle::{LifecycleController, ShutdownOutcome, ShutdownReason, ShutdownReport};
pub use router::{AppState, create_router};
pub use server::Bridge;
pub use streaming::{
    CloseSummary, SESSION_ID_HEADER, SessionRegistry, SessionState, SessionTransport,
    SseConnection, SseTransport,
};
