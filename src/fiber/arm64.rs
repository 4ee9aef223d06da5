use std::arch::global_asm;

/// Callee-saved register file (AAPCS64): `x19`-`x28`, the frame pointer
/// `x29`, the link register `x30` (doubles as the resume address), the
/// stack pointer, and the callee-saved vector registers `d8`-`d15`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Context {
	x19: u64,
	x20: u64,
	x21: u64,
	x22: u64,
	x23: u64,
	x24: u64,
	x25: u64,
	x26: u64,
	x27: u64,
	x28: u64,
	x29: u64,
	x30: u64,
	sp: u64,
	d8: u64,
	d9: u64,
	d10: u64,
	d11: u64,
	d12: u64,
	d13: u64,
	d14: u64,
	d15: u64
}

impl Default for Context {
	fn default() -> Self {
		/* Safety: an all-zero Context is never jumped to before `save` runs */
		unsafe { std::mem::zeroed() }
	}
}

global_asm!(
	".text",
	".global cofiber_arm64_save",
	".global cofiber_arm64_jump",
	"cofiber_arm64_save:",
	"    stp x19, x20, [x0, #0]",
	"    stp x21, x22, [x0, #16]",
	"    stp x23, x24, [x0, #32]",
	"    stp x25, x26, [x0, #48]",
	"    stp x27, x28, [x0, #64]",
	"    stp x29, x30, [x0, #80]",
	"    mov x9, sp",
	"    str x9, [x0, #96]",
	"    stp d8, d9, [x0, #104]",
	"    stp d10, d11, [x0, #120]",
	"    stp d12, d13, [x0, #136]",
	"    stp d14, d15, [x0, #152]",
	"    mov w0, #0",
	"    ret",
	"cofiber_arm64_jump:",
	"    ldp x19, x20, [x0, #0]",
	"    ldp x21, x22, [x0, #16]",
	"    ldp x23, x24, [x0, #32]",
	"    ldp x25, x26, [x0, #48]",
	"    ldp x27, x28, [x0, #64]",
	"    ldp x29, x30, [x0, #80]",
	"    ldr x9, [x0, #96]",
	"    mov sp, x9",
	"    ldp d8, d9, [x0, #104]",
	"    ldp d10, d11, [x0, #120]",
	"    ldp d12, d13, [x0, #136]",
	"    ldp d14, d15, [x0, #152]",
	"    mov w0, w1",
	"    cmp w0, #0",
	"    b.ne 2f",
	"    mov w0, #1",
	"2:",
	"    ret"
);

extern "C" {
	/// Captures the current register file and stack/link register into
	/// `ctx`, returning `0`. When a later [`jump`] targets `ctx`, this
	/// call appears to return a second time with the value passed to
	/// `jump`.
	pub fn cofiber_arm64_save(ctx: *mut Context) -> i32;

	/// Restores the register file captured in `ctx` and transfers control
	/// to it, making the matching [`cofiber_arm64_save`] call return
	/// `value` (forced to `1` if `value == 0`, matching `longjmp`'s
	/// contract).
	pub fn cofiber_arm64_jump(ctx: *const Context, value: i32) -> !;
}

pub use cofiber_arm64_jump as jump;
pub use cofiber_arm64_save as save;
