pub mod attendance;
pub mod backup;
pub mod classes;
pub mod core;
pub mod flow;
pub mod setup;
pub mod students;
