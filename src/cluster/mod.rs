//! The cluster routing core: slot table (§4.F) and dispatcher (§4.G).

pub mod dispatch;
pub mod slots;

pub use dispatch::{aggregate, classify, derive_key_index, fan_out, Dispatcher, Execution, FanOutKind};
pub use slots::SlotTable;
