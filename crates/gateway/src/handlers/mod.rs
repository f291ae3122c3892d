//! API handlers module

pub mod auth;
pub mod documents;
pub mod health;
pub mod tickets;
pub mod users;
pub mod verify;

use serde::Serialize;

/// Mutation response: a human-readable message plus the affected resource
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub message: &'static str,
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn new(message: &'static str, data: T) -> Self {
        Self { message, data }
    }
}

/// Response carrying only a message
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}
