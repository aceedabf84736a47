//! Coordination-free unique log ids
//!
//! Ids are UUIDv7: a millisecond Unix timestamp followed by a counter
//! and random bits. Ids created in one process are strictly increasing.

use uuid::Uuid;

/// Length of an encoded id
pub const ID_LEN: usize = 36;

/// Generator for globally unique log ids
#[derive(Debug, Default)]
pub struct IdGenerator;

impl IdGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Produce the next id
    pub fn next_id(&self) -> String {
        Uuid::now_v7().to_string()
    }
}
