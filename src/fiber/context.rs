//! The isolated unsafe core: architecture-specific non-local jumps.
//!
//! `save` and `jump` are a `setjmp`/`longjmp` pair, not a full context
//! switch — there is only ever one machine stack in play, so resuming a
//! fiber never needs to juggle two register files at once, just restore
//! one and jump into it.

#[cfg(target_arch = "x86_64")]
mod arch {
	pub use crate::fiber::x64::*;
}

#[cfg(target_arch = "aarch64")]
mod arch {
	pub use crate::fiber::arm64::*;
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("cofiber's stack-copying dispatcher has no non-local jump implementation for this architecture");

pub use arch::Context;

/// Captures the current register file into `ctx` and returns `0`.
///
/// # Safety
/// `ctx` must be valid for writes of `size_of::<Context>()` bytes.
#[inline(always)]
pub unsafe fn save(ctx: *mut Context) -> i32 {
	/* Safety: guaranteed by caller */
	unsafe { arch::save(ctx) }
}

/// Restores the register file in `ctx` and transfers control there. The
/// matching [`save`] call returns `value` (or `1` if `value == 0`).
///
/// # Safety
/// `ctx` must hold a state previously captured by [`save`] on this same
/// native stack, and the stack bytes live at the time of that `save` must
/// still be intact at the same addresses.
#[inline(always)]
pub unsafe fn jump(ctx: *const Context, value: i32) -> ! {
	/* Safety: guaranteed by caller */
	unsafe { arch::jump(ctx, value) }
}
