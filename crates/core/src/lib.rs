//! Domain model and grading engine shared by the judge runtime and the server.

pub mod domain;
pub mod grading;
