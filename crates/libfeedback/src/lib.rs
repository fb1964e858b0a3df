pub mod error;
pub mod service;
pub mod session;
pub mod signal;
pub mod token;
pub mod url;

pub use error::SessionError;
pub use service::{FeedbackService, ServiceConfig};
pub use session::{RegistryConfig, SessionObserver, SessionRegistry, WaitOutcome};
pub use signal::CompletionSignal;
pub use token::{AccessToken, TokenStore};
pub use url::{PublicAddress, UrlBinder};

pub use feedback_protocol::{
    CommandLog, Feedback, FeedbackKind, FeedbackTicket, ImageAttachment, SessionId,
    SessionSnapshot, SessionStatus, StatusReport,
};
