pub mod ack;

pub use ack::mark_sent_on_ack;
