//! The line-discipline half of console output. The actual backing device
//! (UART, or a host terminal under `cfg(test)`) is an external collaborator
//! this crate never touches directly, the same split the teacher's
//! `console.rs`/`uart.rs` makes — except here the device end is reduced to
//! a single trait object, `ConsoleSink`, since trap-driven UART I/O itself
//! is out of this crate's scope.

use crate::lock::Spinlock;

/// The backing output device. A real boot wires this to the UART; tests
/// wire it to nothing (the default no-op sink) so unit tests that happen
/// to call `println!` don't need a real console.
pub trait ConsoleSink: Sync {
    fn putc(&self, c: u8);
}

struct NullSink;

impl ConsoleSink for NullSink {
    fn putc(&self, _c: u8) {}
}

static NULL_SINK: NullSink = NullSink;

pub struct Printer {
    sink: &'static dyn ConsoleSink,
}

impl Printer {
    const fn new() -> Self {
        Self { sink: &NULL_SINK }
    }

    pub fn putc(&self, c: u8) {
        self.sink.putc(c);
    }
}

pub static PRINTER: Spinlock<Printer> = Spinlock::new("printer", Printer::new());

/// Installs the real backing device. Must run once at boot, before any
/// interrupt or other hart could be calling `print!`/`println!`.
pub fn init(sink: &'static dyn ConsoleSink) {
    PRINTER.lock().sink = sink;
}
