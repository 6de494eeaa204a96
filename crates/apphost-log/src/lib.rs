//! Event bus and bounded log console shared by the App runtime and the HTTP
//! API's SSE log stream.

pub mod bus;
pub mod console;
pub mod format;

pub use bus::{EventBus, ListenerId};
pub use console::{Console, ConsoleEvent, DEFAULT_MAX_LEN};
