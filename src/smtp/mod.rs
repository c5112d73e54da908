//! SMTP acceptance: peer filtering, the per-connection state machine, and
//! the listener that drives it.

pub mod filter;
pub mod server;
pub mod session;

pub use filter::PeerFilter;
pub use server::SmtpServer;
pub use session::{Session, Step};
