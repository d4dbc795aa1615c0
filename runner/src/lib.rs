pub mod combination;
pub mod config;
pub mod document;
pub mod executors;
pub mod inspect;
pub mod layout;
pub mod materialize;
pub mod parameter;
pub mod report;
pub mod sentinel;
pub mod state;
pub mod store;
pub mod study;
pub mod templates;

pub use study::{Study, StudyError};

#[cfg(test)]
mod test_support;
