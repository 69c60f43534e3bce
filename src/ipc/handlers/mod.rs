pub mod activities;
pub mod compare;
pub mod core;
pub mod history;
pub mod records;
