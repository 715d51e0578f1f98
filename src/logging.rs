// src/logging.rs
//! Logger setup for the plugin.
//!
//! - `log` facade everywhere in the crate
//! - env_logger formats records (ms timestamps, no target, `RUST_LOG` override)
//! - Output is piped to the host's log callback when one is registered, stderr otherwise
//! - Panics are logged before `catch_unwind` turns them into neutral return values

use std::ffi::{c_char, CString};
use std::io::{self, Write};
use std::sync::Once;

use log::LevelFilter;
use parking_lot::RwLock;

/// Host callback receiving one NUL-terminated line per call.
pub type LogCallback = extern "C" fn(*const c_char);

static CALLBACK: RwLock<Option<LogCallback>> = parking_lot::const_rwlock(None);
static PANIC_HOOK: Once = Once::new();

pub fn set_callback(callback: Option<LogCallback>) {
    *CALLBACK.write() = callback;
}

/// Install the global logger. Returns `false` if a logger was already set
/// (by an earlier call or by a Rust host).
pub fn init(level: LevelFilter) -> bool {
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp_millis()
        .format_target(false)
        .parse_default_env()
        .target(env_logger::Target::Pipe(Box::new(HostWriter::default())))
        .try_init()
        .is_ok()
}

/// Route panic messages through `log` so the host sees them.
pub fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let msg = match info.payload().downcast_ref::<&'static str>() {
                Some(s) => *s,
                None => match info.payload().downcast_ref::<String>() {
                    Some(s) => &s[..],
                    None => "Box<dyn Any>",
                },
            };
            let location = info
                .location()
                .map_or("unknown location".to_string(), |loc| format!("{}:{}", loc.file(), loc.line()));
            log::error!("panic in hair bridge: {} ({})", msg, location);
            previous(info);
        }));
    });
}

// ---------- Host pipe ----------

#[derive(Default)]
struct HostWriter {
    pending: Vec<u8>,
}

impl HostWriter {
    fn emit(line: &[u8]) -> io::Result<()> {
        let callback = *CALLBACK.read();
        match callback {
            Some(cb) => {
                let text = to_c_line(line);
                cb(text.as_ptr());
                Ok(())
            }
            None => io::stderr().write_all(line),
        }
    }
}

impl Write for HostWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        for line in split_lines(&mut self.pending) {
            Self::emit(&line)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            Self::emit(&rest)?;
        }
        Ok(())
    }
}

/// Remove and return every complete line (newline included) from `buf`.
fn split_lines(buf: &mut Vec<u8>) -> Vec<Vec<u8>> {
    let mut lines = Vec::new();
    while let Some(end) = buf.iter().position(|&b| b == b'\n') {
        lines.push(buf.drain(..=end).collect());
    }
    lines
}

fn to_c_line(line: &[u8]) -> CString {
    let bytes: Vec<u8> = line.iter().copied().filter(|&b| b != 0).collect();
    // interior NULs were filtered above
    CString::new(bytes).unwrap_or_default()
}
