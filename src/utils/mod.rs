pub mod time;

pub use time::*;

