//! Shared state crossing task boundaries: the live session map and the set
//! of direct rooms.

mod direct;
mod sessions;

pub use direct::DirectRooms;
pub(crate) use sessions::SessionSlot;
pub use sessions::{SessionRegistry, SessionSettings};
