pub mod backend;
pub mod catalog;
pub mod coordinator;
pub mod errors;
pub mod models;
pub mod playlist;
pub mod progress;
pub mod tools;
pub mod utils;
