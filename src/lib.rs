pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod hasher;
pub mod metadata;
pub mod models;
pub mod retry;
pub mod scanner;
pub mod startup;
pub mod state;
pub mod thumbs;
