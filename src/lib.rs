//! # conduitbus
//!
//! Re-exports [`conduitbus_core`], the workspace's implementation crate.
//! Depend on this crate directly; use `conduitbus_core` only if you need to
//! pin a narrower dependency surface (e.g. a library that only needs the
//! connection pool).

pub use conduitbus_core::*;
