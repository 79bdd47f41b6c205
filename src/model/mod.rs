//! Domain types shared by every notifier component.
//!
//! - [`Event`]: an immutable prototype-availability record owned by the event log
//! - [`Subscriber`]: a player, its filter and its delivery endpoint
//! - [`DeliveryTask`]: delivery state for one (event, subscriber) pair

mod event;
mod subscriber;
mod task;

pub use event::{Event, NewEvent, Sequence};
pub use subscriber::{game_matches, Subscriber, SubscriberFilter, MATCH_ALL};
pub use task::{delivery_id, DeliveryTask, TaskCounts, TaskKey, TaskState};
