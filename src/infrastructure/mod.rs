pub mod bluetooth;
pub mod logging;
pub mod report_sink;
