//! HTTP clients for the external generation services.
//!
//! - Description service: synchronous call producing scene descriptions
//! - Video/music synthesis services: start an operation, poll it to a
//!   terminal status

pub mod description;
pub mod error;
pub mod generation;
pub mod types;

pub use description::{DescriptionClient, DescriptionConfig};
pub use error::{ClientError, ClientResult};
pub use generation::{GenerationConfig, GenerationService, HttpGenerationClient};
pub use types::{GenerationRequest, OperationId, OperationPoll, OperationStatus};
