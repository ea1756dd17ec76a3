pub mod clock;
pub mod dir;
pub mod display;
pub mod logging;
pub mod runtime;
pub mod time;
