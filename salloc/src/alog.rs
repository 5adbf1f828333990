//! Allocator logging, silenced whenever [`should_log`](crate::should_log) says so.
//!
//! Every record goes to the `salloc` target so the driver can filter allocator chatter apart from
//! its own.

macro_rules! alog {
    ($level:ident, $($arg:tt)*) => {
        if $crate::should_log() {
            log::$level!(target: "salloc", $($arg)*);
        }
    };
}

macro_rules! aerror {
    ($($arg:tt)*) => { alog!(error, $($arg)*) };
}

macro_rules! awarn {
    ($($arg:tt)*) => { alog!(warn, $($arg)*) };
}

macro_rules! ainfo {
    ($($arg:tt)*) => { alog!(info, $($arg)*) };
}

macro_rules! adebug {
    ($($arg:tt)*) => { alog!(debug, $($arg)*) };
}

macro_rules! atrace {
    ($($arg:tt)*) => { alog!(trace, $($arg)*) };
}
