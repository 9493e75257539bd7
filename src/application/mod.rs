//! Application layer: the stateful services.
//!
//! `SessionStore` and `GateController` each own their lock and are created
//! once per process, then shared with the `PaymentPipeline`. The
//! `PayoutScheduler` runs on its own and touches only the wallet. `Merchant`
//! wires all of them together for a running process.

pub mod gate;
pub mod merchant;
pub mod payout;
pub mod pipeline;
pub mod sessions;
