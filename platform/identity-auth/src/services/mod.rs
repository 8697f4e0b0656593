pub mod registration_service;

pub use registration_service::{AuthError, Registered, RegistrationService};
