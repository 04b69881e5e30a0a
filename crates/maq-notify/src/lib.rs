pub mod dedupe;
pub mod dispatch;

pub use dedupe::{Channel, Decision, DedupPolicy, Deduper, Notification};
pub use dispatch::{Dispatcher, HttpGateway, PushGateway};
