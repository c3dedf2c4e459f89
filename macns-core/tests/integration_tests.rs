use macns_core::*;
use std::net::{IpAddr, Ipv4Addr};

#[test]
fn test_run_config_serialization() {
    let config = RunConfig::new()
        .with_gateway(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))
        .with_mac("02:42:ac:11:00:02")
        .with_shaping(ShapingProfile::from_millis(50, 10, 0.5))
        .with_netns_path("/var/run/netns/w000t1234");

    let json = serde_json::to_string(&config).unwrap();
    assert!(json.contains("\"address\":\"192.168.1.11/24\""));
    assert!(json.contains("\"latency\":50"));
    assert!(json.contains("\"jitter\":10"));

    let deserialized: RunConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(config, deserialized);
}

#[test]
fn test_cidr_deserialize_rejects_invalid() {
    let result: std::result::Result<Cidr, _> = serde_json::from_str("\"10.0.0.1/99\"");
    assert!(result.is_err());
}

#[test]
fn test_mac_address_serialization() {
    let mac: MacAddress = "aa:bb:cc:dd:ee:ff".parse().unwrap();
    let json = serde_json::to_string(&mac).unwrap();
    assert_eq!(json, "\"aa:bb:cc:dd:ee:ff\"");
}

#[test]
fn test_exit_info_display() {
    let info = ExitInfo {
        pid: 4242,
        termination: Termination::Signaled(9),
    };

    assert_eq!(info.to_string(), "pid 4242 terminated by signal 9");
    assert_eq!(info.exit_code(), 137);
    assert!(!info.was_killed());
}

#[test]
fn test_invalid_config_display() {
    let err = Error::invalid_config("command cannot be empty");
    assert_eq!(
        err.to_string(),
        "Invalid configuration: command cannot be empty"
    );
}
