// Core modules
pub mod core;
pub mod adapters;
pub mod orchestrator;
pub mod auto_register;

// Attempt building blocks
pub mod cipher;
pub mod generator;
pub mod poller;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use core::types::*;
pub use core::context::*;
pub use core::result::*;
pub use adapters::*;
pub use orchestrator::*;
pub use auto_register::*;
pub use cipher::{CipherError, FieldCipher};
pub use generator::{CandidateGenerator, RandomCandidateGenerator};
pub use poller::{await_token, PollOutcome, PollRequest, PollSettings};
