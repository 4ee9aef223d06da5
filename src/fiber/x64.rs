use std::arch::global_asm;

/// Callee-saved register file plus the bits needed to resume execution at
/// the point `save` was called: the return address and the stack pointer
/// the caller will have once `save`'s `call` instruction returns.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Context {
	rip: u64,
	rsp: u64,
	rbx: u64,
	rbp: u64,
	r12: u64,
	r13: u64,
	r14: u64,
	r15: u64
}

impl Default for Context {
	fn default() -> Self {
		/* Safety: an all-zero Context is never jumped to before `save` runs */
		unsafe { std::mem::zeroed() }
	}
}

global_asm!(
	".text",
	".global cofiber_x64_save",
	".global cofiber_x64_jump",
	"cofiber_x64_save:",
	"    mov rax, [rsp]",      // return address, pushed by our caller's `call`
	"    mov [rdi], rax",      // ctx.rip
	"    lea rax, [rsp + 8]",  // sp as seen by the caller after `ret`
	"    mov [rdi + 8], rax",  // ctx.rsp
	"    mov [rdi + 16], rbx",
	"    mov [rdi + 24], rbp",
	"    mov [rdi + 32], r12",
	"    mov [rdi + 40], r13",
	"    mov [rdi + 48], r14",
	"    mov [rdi + 56], r15",
	"    xor eax, eax",
	"    ret",
	"cofiber_x64_jump:",
	"    mov rbx, [rdi + 16]",
	"    mov rbp, [rdi + 24]",
	"    mov r12, [rdi + 32]",
	"    mov r13, [rdi + 40]",
	"    mov r14, [rdi + 48]",
	"    mov r15, [rdi + 56]",
	"    mov rsp, [rdi + 8]",
	"    mov eax, esi",
	"    test eax, eax",
	"    jnz 2f",
	"    mov eax, 1",
	"2:",
	"    jmp qword ptr [rdi]"
);

extern "C" {
	/// Captures the current register file and stack/instruction pointer
	/// into `ctx`, returning `0`. When a later [`jump`] targets `ctx`, this
	/// call appears to return a second time with the value passed to
	/// `jump`.
	pub fn cofiber_x64_save(ctx: *mut Context) -> i32;

	/// Restores the register file captured in `ctx` and transfers control
	/// to it, making the matching [`cofiber_x64_save`] call return `value`
	/// (forced to `1` if `value == 0`, matching `longjmp`'s contract).
	pub fn cofiber_x64_jump(ctx: *const Context, value: i32) -> !;
}

pub use cofiber_x64_jump as jump;
pub use cofiber_x64_save as save;
