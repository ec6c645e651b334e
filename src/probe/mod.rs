pub mod burst;
pub mod burst_receiver;
pub mod burst_transmitter;
pub mod control_channel;
pub mod endpoint;
pub mod pacer;
pub mod probe_config;
pub mod probe_header;
pub mod probe_socket;
pub mod rate_estimator;
pub mod result_sink;
pub mod session;
pub mod session_result;
