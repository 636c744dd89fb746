//! Standard library available to every program

pub mod builtins;
