//! Livefeed Feed - live/polling coordination and topic subscriptions
//!
//! [`LiveFeed`] sits on top of one shared socket connection and keeps the
//! dashboard's pending-work view current: live messages while the socket is
//! healthy, periodic HTTP fetches once the socket layer gives up.

pub mod coordinator;
pub mod source;
pub mod status;
pub mod subscribers;

pub use coordinator::LiveFeed;
pub use source::FeedSource;
pub use status::FeedStatus;
pub use subscribers::{
    MessageCallback, QueueCallback, SubscriberRegistry, SubscriberSet, Subscription,
    TransactionCallback,
};
