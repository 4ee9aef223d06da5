//! A cooperative user-space fiber dispatcher built on stack copying, with a
//! round-robin, multi-processor scheduler layered on top.
//!
//! All fibers on a worker share that worker's native stack. A fiber that
//! blocks has its live stack bytes copied out to a heap buffer; a fiber
//! that is resumed has those bytes copied back before control is
//! transferred to it. This trades a `memcpy` on every suspend/resume for
//! not needing to pre-allocate a stack per fiber.

pub mod opt;

#[macro_use]
pub mod macros;

#[cfg(feature = "logger")]
pub mod log;

pub mod fiber;
pub mod scheduler;

extern crate self as cofiber;
