use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogServiceType {
    Register,
    Database,
    Detection,
    Recognition,
    Attendance,
    Index,
    Other
}
impl LogServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogServiceType::Register => "REGISTER",
            LogServiceType::Database => "DATABASE",
            LogServiceType::Detection => "DETECTION",
            LogServiceType::Recognition => "RECOGNITION",
            LogServiceType::Attendance => "ATTENDANCE",
            LogServiceType::Index => "INDEX",
            LogServiceType::Other => "OTHER"
        }
    }
}

pub fn log_info(service: LogServiceType, message: String) {
    info!(service = service.as_str(), "{}", message)
}

pub fn log_warn(service: LogServiceType, message: String) {
    warn!(service = service.as_str(), "{}", message)
}

pub fn log_error(service: LogServiceType, message: String) {
    error!(service = service.as_str(), "{}", message)
}
