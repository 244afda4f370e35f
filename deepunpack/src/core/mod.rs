pub mod app_dirs;
pub mod archive_input;
pub mod config;
pub mod pacing;
pub mod path_utils;
pub mod task_control;
