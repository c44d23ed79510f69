use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;


#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(from = "String", into = "String")]
pub enum DeviceStatus {
    Online,
    Offline,
    Unauthorized,
    NotFound,
    Other(String),
}

impl DeviceStatus {
    pub fn as_str(&self) -> &str {
        match self {
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
            DeviceStatus::Unauthorized => "unauthorized",
            DeviceStatus::NotFound => "not_found",
            DeviceStatus::Other(state) => state,
        }
    }
}

impl From<&str> for DeviceStatus {
    fn from(state: &str) -> Self {
        match state {
            // adb reports a reachable device as "device"
            "device" | "online" => DeviceStatus::Online,
            "offline" => DeviceStatus::Offline,
            "unauthorized" => DeviceStatus::Unauthorized,
            "not_found" => DeviceStatus::NotFound,
            other => DeviceStatus::Other(other.to_string()),
        }
    }
}

impl From<String> for DeviceStatus {
    fn from(state: String) -> Self {
        DeviceStatus::from(state.as_str())
    }
}

impl From<DeviceStatus> for String {
    fn from(status: DeviceStatus) -> Self {
        status.as_str().to_string()
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}


#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeviceReport {
    pub requested: Option<DeviceStatus>,
    pub devices: BTreeMap<String, DeviceStatus>,
}


/// Parses the output of `adb devices`.
///
/// The first line is the "List of devices attached" header. Entries are
/// `serial<TAB>state`, though any whitespace is accepted, and trailing
/// columns (as printed by `devices -l`) are ignored.
pub fn parse_devices(output: &str) -> BTreeMap<String, DeviceStatus> {
    let mut devices = BTreeMap::new();

    // The daemon may print start-up notices before the header.
    let lines: Vec<&str> = output.lines().collect();
    let start = lines
        .iter()
        .position(|line| line.trim_start().starts_with("List of devices"))
        .map_or(1, |header| header + 1);

    for line in lines.iter().skip(start) {
        let line = line.trim();
        if line.is_empty() || line.starts_with('*') {
            continue;
        }

        let mut fields = line.split_whitespace();
        if let (Some(serial), Some(state)) = (fields.next(), fields.next()) {
            devices.insert(serial.to_string(), DeviceStatus::from(state));
        }
    }

    devices
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_device() {
        let devices = parse_devices("List of devices attached\nABC123\tdevice\n");
        assert_eq!(devices.len(), 1);
        assert_eq!(devices.get("ABC123"), Some(&DeviceStatus::Online));
    }

    #[test]
    fn test_parse_header_only() {
        assert!(parse_devices("List of devices attached\n\n").is_empty());
        assert!(parse_devices("").is_empty());
    }

    #[test]
    fn test_parse_whitespace_and_states() {
        let output = "List of devices attached\n\
                      127.0.0.1:6555   offline\n\
                      emulator-5554 unauthorized\n\
                      R58M123 device usb:1-1 product:beyond model:SM_G973F\n\
                      weird-one recovery\n";
        let devices = parse_devices(output);

        assert_eq!(devices["127.0.0.1:6555"], DeviceStatus::Offline);
        assert_eq!(devices["emulator-5554"], DeviceStatus::Unauthorized);
        assert_eq!(devices["R58M123"], DeviceStatus::Online);
        assert_eq!(devices["weird-one"], DeviceStatus::Other("recovery".to_string()));
    }

    #[test]
    fn test_parse_skips_daemon_notices() {
        let output = "* daemon not running; starting now at tcp:5037\n\
                      List of devices attached\n\
                      * daemon started successfully\n\
                      ABC123\tdevice\n";
        let devices = parse_devices(output);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices["ABC123"], DeviceStatus::Online);
    }

    #[test]
    fn test_status_serializes_as_string() {
        let value = serde_json::to_value(DeviceStatus::Offline).unwrap();
        assert_eq!(value, serde_json::json!("offline"));
        let status: DeviceStatus = serde_json::from_value(serde_json::json!("device")).unwrap();
        assert_eq!(status, DeviceStatus::Online);
    }
}
