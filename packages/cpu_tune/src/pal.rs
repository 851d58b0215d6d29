//! Platform abstraction layer (PAL). Every interaction with the operating system and the
//! processor goes through one of the traits defined here, so the layers above can be exercised
//! against mocks and the fake platform.
//!
//! Each concern follows the same three-layer layout: an abstraction (trait), a facade (enum that
//! dispatches to the real implementation or to a test double) and the real implementation for
//! the build target.

mod bindings;
mod filesystem;
mod msr;

pub(crate) use bindings::*;
pub(crate) use filesystem::*;
pub(crate) use msr::*;
