//! Chat module
//!
//! Message model, input validation, simulated delivery and the conversation
//! store that ties them together.

pub mod delivery;
pub mod models;
pub mod store;
pub mod validation;

pub use delivery::{retry_with_backoff, DeliveryOutcome, RetryOptions, SimulatedTransport, Transport};
pub use models::{Message, MessageRecord, UserInfo};
pub use store::{ChatStats, ChatStore};
