// Serial diagnostics: COM1 on bare metal, stdout under host tests.
use core::fmt;

#[cfg(feature = "bare-metal")]
use lazy_static::lazy_static;
#[cfg(feature = "bare-metal")]
use spin::Mutex;
#[cfg(feature = "bare-metal")]
use uart_16550::SerialPort;

#[cfg(feature = "bare-metal")]
lazy_static! {
    pub static ref SERIAL1: Mutex<SerialPort> = {
        let mut serial_port = unsafe { SerialPort::new(0x3F8) };
        serial_port.init();
        Mutex::new(serial_port)
    };
}

#[doc(hidden)]
#[cfg(feature = "bare-metal")]
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;
    use x86_64::instructions::interrupts;

    interrupts::without_interrupts(|| {
        SERIAL1
            .lock()
            .write_fmt(args)
            .expect("Printing to serial failed");
    });
}

#[doc(hidden)]
#[cfg(all(test, not(feature = "bare-metal")))]
pub fn _print(args: fmt::Arguments) {
    std::print!("{}", args);
}

#[doc(hidden)]
#[cfg(all(not(test), not(feature = "bare-metal")))]
pub fn _print(_args: fmt::Arguments) {}

/// Prints to the host through the serial interface.
#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::serial::_print(format_args!($($arg)*))
    };
}

/// Prints to the host through the serial interface, appending a newline.
#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($fmt:expr) => ($crate::serial_print!(concat!($fmt, "\n")));
    ($fmt:expr, $($arg:tt)*) => ($crate::serial_print!(
        concat!($fmt, "\n"), $($arg)*));
}
