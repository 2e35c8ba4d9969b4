//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Registries (`hub`, `presence`, `typing`) own their own locks. `broadcast`
//! holds the validate/persist/fan-out handlers, `session` turns socket
//! frames into calls on it, and `assistant` builds prompts for the LLM.

pub mod assistant;
pub mod broadcast;
pub mod hub;
pub mod message;
pub mod presence;
pub mod room;
pub mod session;
pub mod typing;
pub mod upload;
