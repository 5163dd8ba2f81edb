pub mod compose;
pub mod doctor;
pub mod render;
