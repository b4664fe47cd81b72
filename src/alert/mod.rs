//! Alert records, storage and the presence state machine.

mod record;
mod state;
mod store;

pub use record::{
    validate_location, AlertError, AlertOrigin, AlertRecord, AlertRef, AlertStatus, AlertUpdate,
    NewAlert, DEFAULT_ALERT_MESSAGE, DEFAULT_LOCATION, UID_HEX_LEN,
};
pub use state::{AlertDecision, AlertStateMachine, PresenceSnapshot, PresenceState};
pub use store::AlertStore;
