pub mod reconciler;
pub mod report;
pub mod scripts;
pub mod task_manager;
