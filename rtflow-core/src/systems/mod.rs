//! Stock Systems
//!
//! Small nodes that most graphs need: sources, a gain, a summer and a
//! closure-backed transform. Each has an `add` constructor that creates it
//! inside a graph and returns its handle; ports are read back through
//! accessors on the system.

mod callback;
mod constant;
mod exposed;
mod gain;
mod summer;

pub use callback::Callback;
pub use constant::Constant;
pub use exposed::ExposedOutput;
pub use gain::Gain;
pub use summer::{Polarity, Summer};
