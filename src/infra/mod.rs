// Infrastructure layer - 基础设施层
// 负责串行化数据库访问、时钟和指标

pub mod clock;
pub mod connection_slot;
pub mod database;
pub mod metrics;

#[cfg(test)]
pub(crate) mod test_support;

pub use clock::{Clock, ManualClock, SystemClock};
pub use connection_slot::{ConnectionSlot, SlotPermit};
pub use database::{DatabaseError, DatabaseRegistry, SerializedDatabase};
