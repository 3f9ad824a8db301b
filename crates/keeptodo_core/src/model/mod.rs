mod filter;
mod task;

pub use filter::Filter;
pub use task::{Priority, Task, now_timestamp};
