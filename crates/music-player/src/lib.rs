pub mod cli;
pub mod config;
pub mod controls;
pub mod playlist;
pub mod runtime;
pub mod settings;
