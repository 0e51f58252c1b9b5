//! I/O utilities for the session relay and stream adapters.

mod prefixed;
mod relay;

pub use prefixed::PrefixedStream;
pub use relay::{Direction, NoOpObserver, RelayEnd, RelayObserver, RelayOptions, Verdict, relay_session};
