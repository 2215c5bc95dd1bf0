//! Serial device access for the G-code sender
//!
//! This module provides:
//! - Opening a device and listing available ports
//! - The command/response session that owns an open device

pub mod port;
pub mod session;

pub use port::{list_ports, print_ports};
pub use session::Session;
