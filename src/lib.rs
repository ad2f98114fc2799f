pub mod capture;
pub mod config;
pub mod error;
pub mod events;
pub mod export;
pub mod proxy;
pub mod state;
pub mod web;
