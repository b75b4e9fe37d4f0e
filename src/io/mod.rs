pub mod arena;
pub mod ownership;
pub mod stream;
pub mod trace;
pub mod traits;

pub use arena::Arena;
pub use ownership::{Owner, Ownership};
pub use stream::Stream;
pub use trace::TraceRecord;
