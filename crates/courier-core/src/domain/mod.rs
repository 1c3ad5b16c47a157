//! Domain model (IDs, events, states, outcomes, errors).

pub mod errors;
pub mod event;
pub mod ids;
pub mod outcome;
pub mod state;

pub use self::errors::{OutboxError, StoreError};
pub use self::event::{NewEvent, QueuedEvent};
pub use self::ids::{CycleId, EventId};
pub use self::outcome::{DeliveryError, DeliveryOutcome};
pub use self::state::{RecordState, SchedulerState};
