pub mod classes;
pub mod core;
pub mod marks;
pub mod requests;
pub mod school;
pub mod students;
pub mod subjects;
