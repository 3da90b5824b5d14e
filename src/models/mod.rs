//! Data models for identities, presence, and snowflake IDs.

pub mod identity;
pub mod presence;
pub mod snowflake;

pub use identity::*;
pub use presence::*;
pub use snowflake::*;
