pub mod handler;
pub mod worker;

pub use handler::FileTaskHandler;
pub use worker::{run, run_loop, worker_id_from_env, LoopExit, TaskHandler};
