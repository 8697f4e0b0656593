pub mod clock;
pub mod config;
pub mod consumer_tasks;
pub mod db;
pub mod dlq;
pub mod email_sender;
pub mod handlers;
pub mod models;
pub mod repos;
