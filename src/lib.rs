pub mod app;
pub mod application;
pub mod domain;
pub mod infrastructure;
