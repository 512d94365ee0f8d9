//! Outbound side of the pipeline: caption text, Instagram publishing and the
//! access token that authorizes it.

pub mod caption;
pub mod publisher;
pub mod token;

pub use caption::CaptionComposer;
pub use publisher::{CarouselPublisher, GraphPublisher, PublishError, PublishResult};
pub use token::{GraphTokenExchanger, RefreshOutcome, TokenExchanger, TokenLifecycle, TokenState};
