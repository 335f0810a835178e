//! WordServe server — wiring between the core engine and the outside world.
//!
//! [`loader`] owns the resident dictionary, [`dispatch`] speaks the
//! MessagePack stdio protocol, [`config`] carries the TOML tunables,
//! [`materialize`] acquires missing chunk files, and [`interactive`] is the
//! human-facing REPL. The algorithms themselves live in `wordserve-core`.

pub mod config;
pub mod dispatch;
pub mod interactive;
pub mod loader;
pub mod materialize;
pub mod protocol;

pub use config::Settings;
pub use dispatch::Dispatcher;
pub use loader::{ChunkLoader, DictIndex, Stats};
