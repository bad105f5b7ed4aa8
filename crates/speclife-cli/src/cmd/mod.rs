pub mod action;
pub mod apply;
pub mod change;
pub mod config;
pub mod status;
pub mod task;
