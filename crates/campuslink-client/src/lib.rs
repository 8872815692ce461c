//! Client library for the CampusLink session chat: a relay connection with
//! scoped room subscriptions, a history synchronizer over the REST data
//! service, and a per-session view that merges the two.

pub mod chat;
pub mod connection;
pub mod error;
pub mod history;
pub mod view;

pub use chat::{SendOutcome, SessionChat};
pub use connection::{IncomingMessage, RelayConnection, RelayHandle, Subscription};
pub use error::ClientError;
pub use history::MessagesApi;
pub use view::{ChatMessage, SessionView};
