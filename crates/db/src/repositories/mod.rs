pub mod generation_task_repo;
pub mod image_repo;

pub use generation_task_repo::GenerationTaskRepo;
pub use image_repo::ImageRepo;
