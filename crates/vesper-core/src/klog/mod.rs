use core::fmt;

#[macro_export]
macro_rules! klog {
    ($($arg:tt)*) => {
        $crate::klog::write_fmt(format_args!($($arg)*))
    };
}

pub type Sink = fn(fmt::Arguments);

static SINK: spin::Once<Sink> = spin::Once::new();

/// Installs the writer used when the crate is built without `std`.
/// Only the first call takes effect.
pub fn set_sink(sink: Sink) {
    SINK.call_once(|| sink);
}

pub fn write_fmt(args: fmt::Arguments) {
    #[cfg(feature = "std")]
    {
        std::print!("{}", args);
    }

    #[cfg(not(feature = "std"))]
    {
        if let Some(sink) = SINK.get() {
            sink(args);
        }
    }
}
