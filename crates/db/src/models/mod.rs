pub mod generation_task;
pub mod image;
