//! Background loops started by `serve`.

pub mod sync;
pub mod token_refresh;
