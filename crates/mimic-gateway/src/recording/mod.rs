//! Request/response capture: the bounded request log and the
//! response-recording sink decorator.

mod request_log;
mod response_recorder;

pub use request_log::{LogEntry, RequestInfo, RequestLog, ResponseInfo, DEFAULT_LOG_CAPACITY};
pub use response_recorder::ResponseRecorder;
