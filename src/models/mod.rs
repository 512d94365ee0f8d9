pub mod credential;
pub mod listing;
pub mod published;

pub use credential::Credential;
pub use listing::{ImageVariants, Listing, Price, SearchPage};
pub use published::PublishedRecord;
