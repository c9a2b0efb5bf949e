// The building blocks the compositor drives, leaf types first.

pub mod pixels;
pub mod plane_def;
pub mod pixel_source;
pub mod plane;
pub mod quantum;
pub mod channel;
pub mod codomain;
pub mod output_buffer;
pub mod stats;
pub mod context;
pub mod region_task;
pub mod worker_pool;
