//! Data models for dashboard entities and live messages

mod counts;
mod de;
mod message;
mod page;
mod queue;
mod transaction;

pub use counts::*;
pub use message::*;
pub use page::*;
pub use queue::*;
pub use transaction::*;
