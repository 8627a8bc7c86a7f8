//! Traffic statistics
//!
//! [`StatsReporter`] answers traffic, presence and runtime queries against
//! the running engine.

mod reporter;

pub use reporter::{
    parse_counter, CombinedTraffic, Direction, InboundTraffic, OutboundTraffic, StatsReporter, UserTraffic,
};
