pub mod registration_engine;

pub use registration_engine::RegistrationEngine;
