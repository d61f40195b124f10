pub mod doctor;
pub mod trajectory;
