mod broker;

pub use broker::{ChangeBroker, FeedEvent};
