//! Business logic: clock, snowflake generation, presence, and its background tasks.

pub mod clock;
pub mod poller;
pub mod presence;
pub mod pruner;
pub mod snowflake;

pub use clock::{Clock, ManualClock, SystemClock};
pub use poller::{PresencePoller, SnapshotReader, TitleSource, ViewerSnapshot};
pub use presence::PresenceService;
pub use pruner::Pruner;
pub use snowflake::SnowflakeGenerator;
