pub mod config;
pub mod duration;
pub mod encode;
pub mod metric;
pub mod runner;
pub mod scheduler;
pub mod shutdown;
pub mod storage;
pub mod writer;

pub use metric::{FieldValue, Measurement, Point, Section};
