//! This module contains utilities for testing probing code without a network. They are used by
//!  the crate's own tests, and they are exported so applications can exercise probing sessions
//!  in their tests as well.

pub mod probe_link;
