use log::{Level, Metadata, Record};
#[cfg(target_arch = "x86")]
use spin::Mutex;
use spin::Once;

use crate::config::DEFAULT_LOG_LEVEL;

pub(crate) struct Logger;
impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Trace
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            crate::kprintln!(
                "[{}:{}] {}",
                record.file().unwrap_or("?"),
                record.line().unwrap_or(0),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}

static LOGGER: Logger = Logger;
static LOGGER_INSTALLED: Once<()> = Once::new();

/// Installs the serial logger. Calling it again is harmless.
pub fn init() {
    LOGGER_INSTALLED.call_once(|| {
        // only fails if another logger was installed first, which then keeps the output
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(DEFAULT_LOG_LEVEL);
    });
}

#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => ({
        $crate::logging::_print(format_args!($($arg)*));
    });
}

#[macro_export]
macro_rules! kprintln {
    () => ($crate::kprint!("\n"));
    ($($arg:tt)*) => ($crate::kprint!("{}\n", format_args!($($arg)*)));
}

#[cfg(any(test, target_arch = "x86"))]
const COM1: u16 = 0x3f8;

#[cfg(any(test, target_arch = "x86"))]
struct PortWriter(u16);

#[cfg(target_arch = "x86")]
static PW: Mutex<PortWriter> = Mutex::new(PortWriter(COM1));

#[cfg(any(test, target_arch = "x86"))]
impl PortWriter {
    #[cfg(target_arch = "x86")]
    fn write_byte(&self, b: u8) {
        unsafe {
            core::arch::asm!("out dx, al", in("dx") self.0, in("al") b, options(nostack, preserves_flags));
        }
    }

    // host test builds have no serial port
    #[cfg(not(target_arch = "x86"))]
    fn write_byte(&self, _b: u8) {
        let _ = self.0;
    }
}

#[cfg(any(test, target_arch = "x86"))]
impl core::fmt::Write for PortWriter {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for byte in s.bytes() {
            match byte {
                // printable ASCII byte or newline
                0x20..=0x7e | b'\n' => self.write_byte(byte),
                // not part of printable ASCII range
                _ => self.write_byte(0xfe),
            }
        }
        Ok(())
    }
}

#[doc(hidden)]
#[cfg(all(not(test), target_arch = "x86"))]
pub fn _print(args: core::fmt::Arguments) {
    use core::fmt::Write;
    // the port writer never reports an error
    let _ = PW.lock().write_fmt(args);
}

#[doc(hidden)]
#[cfg(all(not(test), not(target_arch = "x86")))]
pub fn _print(_args: core::fmt::Arguments) {}

#[doc(hidden)]
#[cfg(test)]
pub fn _print(args: core::fmt::Arguments) {
    std::print!("{}", args);
}
