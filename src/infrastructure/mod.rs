//! Adapters for the domain ports: OS-backed (`ndsctl`, `tc`) and in-memory.

pub mod in_memory;
pub mod ndsctl;
pub mod tc;
