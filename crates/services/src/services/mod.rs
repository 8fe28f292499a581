pub mod boards;
pub mod drag_reorder;
pub mod notify;
pub mod realtime;
pub mod remote_store;
pub mod session;
pub mod task_cache;
pub mod task_commands;
pub mod task_move;
