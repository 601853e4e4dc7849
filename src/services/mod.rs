pub mod message_sink;

pub use message_sink::{LoggingMessageSink, MessageSink, NoopMessageSink};
