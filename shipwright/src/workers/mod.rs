//! Background workers

pub mod resumer;
