/// Maps the Python fleet's log-level vocabulary (DEBUG/INFO/WARNING/ERROR/CRITICAL) onto a
/// `tracing-subscriber` `EnvFilter` directive string scoped to `service_name`, with `lapin`'s
/// own span noise held to a quieter level so broker chatter doesn't drown out application logs.
pub fn build_tracing_filter(service_name: &str, log_level: &str) -> String {
    let rust_level = match log_level.to_uppercase().as_str() {
        "DEBUG" => "debug",
        "INFO" => "info",
        "WARNING" | "WARN" => "warn",
        "ERROR" => "error",
        "CRITICAL" => "error",
        _ => "info",
    };
    let lapin_level = if rust_level == "debug" { "info" } else { "warn" };
    format!("{}={},lapin={}", service_name, rust_level, lapin_level)
}
