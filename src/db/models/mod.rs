//! Database models, one file per table family.
//! Everything is re-exported at `crate::db::models` (and `crate::db`).

pub mod broadcast;
pub mod delivery;
pub mod queued_message;
pub mod recipient;

pub use self::broadcast::*;
pub use self::delivery::*;
pub use self::queued_message::*;
pub use self::recipient::*;
