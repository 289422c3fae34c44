pub mod load_config;
pub mod log_sink;
