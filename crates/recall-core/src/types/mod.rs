//! Core data types: study items and review records.

pub mod item;
pub mod record;

pub use item::{IdCounter, Item, ItemId, MAX_ITEM_ID};
pub use record::{ReviewAction, ReviewRecord};
