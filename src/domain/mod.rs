//! Domain types, pricing and tier policy, and the ports through which the
//! application talks to wallets, the captive portal, and the kernel shaper.

pub mod allotment;
pub mod device;
pub mod message;
pub mod ports;
pub mod session;
pub mod tier;
