//! Well-known header names.

pub const MESSAGE_ID: &str = "message-id";
pub const MESSAGE_TYPE: &str = "message-type";
/// `send` or `publish`.
pub const MESSAGE_INTENT: &str = "message-intent";
pub const TIME_SENT: &str = "time-sent";
pub const REPLY_TO: &str = "reply-to";
pub const CONTROL_MESSAGE: &str = "control-message";
/// Set on messages forwarded to the error queue.
pub const EXCEPTION_MESSAGE: &str = "exception-message";
pub const FAILED_QUEUE: &str = "failed-queue";

pub const INTENT_SEND: &str = "send";
pub const INTENT_PUBLISH: &str = "publish";
