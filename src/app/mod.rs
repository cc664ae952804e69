pub mod cli;
pub mod commands;
pub mod interrupt;
pub mod render;
