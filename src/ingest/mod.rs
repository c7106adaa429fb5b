mod ingester;
mod logon;
mod session;

pub use ingester::Ingester;
pub use logon::next_logon;
pub use session::{SessionCache, SessionState, SessionStatus};
