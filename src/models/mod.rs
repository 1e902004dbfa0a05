use serde::{Deserialize, Serialize};
use chrono::{DateTime, NaiveDate, Utc};


/// Represents the status of a meter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeviceStatus {
    Online,
    Offline,
    Unknown,
}

impl DeviceStatus {
    pub fn to_string(&self) -> String {
        match self {
            DeviceStatus::Online => "Online".to_string(),
            DeviceStatus::Offline => "Offline".to_string(),
            DeviceStatus::Unknown => "Unknown".to_string(),
        }
    }
}

/// Why a meter has its status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StatusDetail {
    None,
    ConfigurationError,
    CommunicationError,
    HandlerInitializingError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeviceProtocol {
    Unknown,
    Mercury,
}

impl DeviceProtocol {
    pub fn to_string(&self) -> String {
        match self {
            DeviceProtocol::Unknown => "Unknown".to_string(),
            DeviceProtocol::Mercury => "Mercury".to_string(),
        }
    }
}

/// What is published on the status topic of a meter
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MeterStatus {
    /// Configured name of the meter
    pub meter_name: String,
    pub status: DeviceStatus,
    pub detail: StatusDetail,
    /// Human readable reason
    pub description: String,
    /// Network address once it is known
    pub address: Option<u8>,
    pub serial_number: Option<String>,
    pub manufactured: Option<NaiveDate>,
    /// Last time a poll cycle produced readings
    pub last_seen: Option<DateTime<Utc>>,
}

impl MeterStatus {
    pub fn new(meter_name: &str) -> Self {
        MeterStatus {
            meter_name: meter_name.to_string(),
            status: DeviceStatus::Unknown,
            detail: StatusDetail::None,
            description: String::new(),
            address: None,
            serial_number: None,
            manufactured: None,
            last_seen: None,
        }
    }

    /// Returns true if anything visible changed
    pub fn update(&mut self, status: DeviceStatus, detail: StatusDetail, description: &str) -> bool {
        let changed = self.status != status || self.detail != detail || self.description != description;
        self.status = status;
        self.detail = detail;
        self.description = description.to_string();
        changed
    }

    pub fn seen(&mut self) {
        self.last_seen = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        assert_eq!(DeviceStatus::Online.to_string(), "Online");
        assert_eq!(DeviceStatus::Offline.to_string(), "Offline");
        assert_eq!(DeviceStatus::Unknown.to_string(), "Unknown");
    }

    #[test]
    fn test_update_reports_changes() {
        let mut status = MeterStatus::new("flat");
        assert!(status.update(DeviceStatus::Online, StatusDetail::None, "Network address is 42"));
        assert!(!status.update(DeviceStatus::Online, StatusDetail::None, "Network address is 42"));
        assert!(status.update(DeviceStatus::Offline, StatusDetail::CommunicationError, "Powermeter does not answer"));
        assert_eq!(status.detail, StatusDetail::CommunicationError);
    }

    #[test]
    fn test_serialized_status() {
        let mut status = MeterStatus::new("flat");
        status.address = Some(42);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "Unknown");
        assert_eq!(json["detail"], "None");
        assert_eq!(json["address"], 42);
        assert!(json["last_seen"].is_null());
    }
}
