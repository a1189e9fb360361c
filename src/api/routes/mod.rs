//! API Routes
//!
//! Route handlers organized by functionality.

pub mod channels;
pub mod events;
pub mod health;
pub mod publish;
