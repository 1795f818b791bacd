pub mod collector;
pub mod monitor;
pub mod percentiles;
pub mod stream;

pub use collector::{ReplayStats, Totals};
pub use monitor::{Monitor, StatusLine, MONITORING_FREQUENCY};
pub use percentiles::PercentileSet;
