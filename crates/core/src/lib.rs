pub mod activity;
pub mod generic_types;
pub mod http;
pub mod instructions;
pub mod lesson;
pub mod mail;
pub mod tools;
