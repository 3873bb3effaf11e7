pub mod controller;
pub mod handlers;

pub use controller::{Admission, AdmissionError, Pipeline};
