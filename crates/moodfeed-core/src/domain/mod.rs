//! Small validated value types shared by the provider clients.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Symbol`] | Upper-cased equity or crypto ticker |
//! | [`UtcDateTime`] | RFC3339 UTC wall-clock timestamp |

mod symbol;
mod timestamp;

pub use symbol::{join_symbols, Symbol};
pub use timestamp::UtcDateTime;
