pub mod task_log;
