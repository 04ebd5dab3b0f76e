//! Cache module

pub mod response;
