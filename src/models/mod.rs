pub mod command;
pub mod task;
