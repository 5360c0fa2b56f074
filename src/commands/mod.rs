pub mod audit;
pub mod components;
pub mod config;
pub mod logs;
pub mod run;
