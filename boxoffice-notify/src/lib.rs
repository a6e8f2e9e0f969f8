pub mod recording;
pub mod smtp;

pub use recording::{RecordingDispatcher, SentEmail};
pub use smtp::SmtpDispatcher;
