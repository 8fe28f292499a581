pub mod board;
pub mod board_member;
pub mod profile;
pub mod task;
