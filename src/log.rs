//! Structured logging, installed once at process load via `ctor`.
//!
//! Grounded in the same stack as the crate this one grew out of: `log` as
//! the facade, `ctor` to install the logger before `main` runs, and
//! `lazy_static` for the shared stderr sink. Scope is reduced to what this
//! crate actually needs: leveled, colorized, single-line-prefixed output,
//! configurable through `COFIBER_LOG`.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::env::var;
use std::fmt::Arguments;
use std::io::{stderr, BufWriter, Result, Stderr, Write};
use std::panic::{set_hook, Location, PanicHookInfo};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use ctor::ctor;
use lazy_static::lazy_static;
pub use log::{Level, LevelFilter};
use log::{set_boxed_logger, set_max_level, Log, Metadata, Record};

lazy_static! {
	static ref STDERR: Mutex<BufWriter<Stderr>> =
		Mutex::new(BufWriter::with_capacity(1024, stderr()));
}

fn get_stderr() -> MutexGuard<'static, BufWriter<Stderr>> {
	#[allow(clippy::unwrap_used)]
	STDERR.lock().unwrap()
}

macro_rules! ansi_color {
	(bold) => {
		format_args!("{}", "\x1b[1m")
	};

	($color:expr) => {
		format_args!("\x1b[1;38;5;{}m", $color)
	};

	() => {
		format_args!("{}", "\x1b[0m")
	};
}

struct Logger;

impl Logger {
	fn write_prefix(&self, out: &mut BufWriter<Stderr>, record: &Record<'_>) -> Result<()> {
		let color = match record.level() {
			Level::Error => ansi_color!(1),
			Level::Warn => ansi_color!(11),
			Level::Info => ansi_color!(10),
			Level::Debug => ansi_color!(14),
			Level::Trace => ansi_color!(bold)
		};

		write!(out, "{}| {: >16} |{} ", color, record.target(), ansi_color!())
	}
}

impl Log for Logger {
	fn enabled(&self, _: &Metadata<'_>) -> bool {
		true
	}

	fn log(&self, record: &Record<'_>) {
		if !self.enabled(record.metadata()) {
			return;
		}

		let mut out = get_stderr();

		if self.write_prefix(&mut out, record).is_ok() {
			let _ = writeln!(out, "{}", record.args());
		}

		let _ = out.flush();
	}

	fn flush(&self) {
		let _ = get_stderr().flush();
	}
}

pub(crate) fn print_fatal(args: Arguments<'_>) {
	let mut out = get_stderr();

	let _ = writeln!(out, "\x1b[1;38;5;1m| {: >16} |\x1b[0m {}", "fatal", args);
	let _ = out.flush();
}

#[track_caller]
fn panic_hook(info: &PanicHookInfo<'_>) {
	let msg = match info.payload().downcast_ref::<&'static str>() {
		Some(s) => (*s).to_string(),
		None => match info.payload().downcast_ref::<String>() {
			Some(s) => s.clone(),
			None => "Box<dyn Any>".to_string()
		}
	};

	let location = info.location();

	print_fatal(format_args!(
		"panic at {}:\n{}",
		location
			.map(Location::to_string)
			.unwrap_or_else(|| "<unknown>".to_string()),
		msg
	));

	let backtrace = Backtrace::capture();

	if backtrace.status() == BacktraceStatus::Captured {
		print_fatal(format_args!("back trace:\n{backtrace}"));
	}
}

#[ctor]
fn init() {
	#[allow(clippy::expect_used)]
	set_boxed_logger(Box::new(Logger)).expect("logger already installed");

	set_hook(Box::new(panic_hook));

	let level = match var("COFIBER_LOG") {
		Ok(level) => LevelFilter::from_str(&level).map_err(|_| Some(level)),
		Err(_) => Err(None)
	};

	match level {
		Ok(level) => set_max_level(level),
		Err(input) => {
			set_max_level(LevelFilter::Info);

			if let Some(input) = input {
				log::error!("invalid COFIBER_LOG value {input:?}, defaulting to info");
			}
		}
	}
}
