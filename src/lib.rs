#![warn(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::new_without_default
)]

pub mod agent;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod observability;
pub mod registry;
pub mod stream;
