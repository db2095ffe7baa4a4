pub mod backup;
pub mod config;
pub mod db;
pub mod model;
pub mod remote;
pub mod sync;
