#![forbid(unsafe_code)]

mod event;
mod ids;
mod value;

pub use event::*;
pub use ids::*;
pub use value::*;
