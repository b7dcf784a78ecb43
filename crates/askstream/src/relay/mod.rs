mod decoder;
mod error;
mod events;
mod extractor;
mod question;
mod server;
mod session;
mod upstream;

pub use decoder::{DATA_PREFIX, MAX_PENDING_BYTES, PayloadStream, SseDecoder};
pub use error::RelayError;
pub use events::RelayEvent;
pub use extractor::{DONE_SENTINEL, StreamRecord, extract_record};
pub use question::{MAX_QUESTION_CHARS, Question, QuestionError};
pub use server::{AppState, AskRequest, RelayServer, create_router};
pub use session::{RelaySession, SessionState};
pub use upstream::{ByteStream, ChatCompletionsClient, CompletionUpstream, UpstreamStream};
