//! Static log-rotation parameters for [`clickgate_log`].

use clickgate_log::StaticLogConfig;

pub struct ClickgateLog;

impl StaticLogConfig for ClickgateLog {
    const MAX_BYTES_PER_LOG_FILE: u64 = 3_000_000;
    const MAX_LOG_FILES: usize = 10;
    const LOG_FILE_PREFIX: &'static str = "clickgate";
}
