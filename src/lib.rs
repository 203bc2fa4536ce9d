pub mod app;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod http;
pub mod labels;
pub mod legacy;
pub mod output;
pub mod peptide;
pub mod providers;
pub mod resolver;
pub mod similarity;
pub mod spectrum;
pub mod usi;
