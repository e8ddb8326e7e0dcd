pub mod amqp;
pub mod csv_log;
pub mod log_sink;
pub mod visualizer;
