//! Built-in capability agents.
//!
//! Each module pairs a [`TaskExecutor`](agora_bus::TaskExecutor)
//! implementation with the capability list it advertises. These are
//! collaborators of the bus core: the substrate works the same with any
//! executor behind the seam.

pub mod file;
pub mod math;
pub mod text;

pub use file::FileExecutor;
pub use math::MathExecutor;
pub use text::TextExecutor;
