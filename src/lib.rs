//! OpenOCD TCL RPC client
//!
//! A client for OpenOCD's TCL RPC socket (TCP port 6666 by default).
//! Commands and responses are UTF-8 text, each terminated by a single 0x1a byte.
//! On top of the raw exchange sit typed helpers for reading and writing target
//! memory words and blocks.

pub mod config;
pub mod error;
pub mod memory;
pub mod session;

pub use config::{Args, Config};
pub use error::{Result, RpcError};
pub use memory::{Word, WordWidth};
pub use session::RpcSession;
