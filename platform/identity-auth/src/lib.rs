pub mod config;
pub mod db;
pub mod events;
pub mod jetstream_setup;
pub mod models;
pub mod outbox;
pub mod password;
pub mod repos;
pub mod services;
