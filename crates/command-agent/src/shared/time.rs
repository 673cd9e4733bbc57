use std::time::SystemTime;

pub fn format_time(time: SystemTime) -> String {
    humantime::format_rfc3339_seconds(time).to_string()
}

pub fn now() -> String {
    format_time(SystemTime::now())
}
