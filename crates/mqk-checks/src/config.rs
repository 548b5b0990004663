use anyhow::{anyhow, Context, Result};
use mqk_schemas::Monitor;

/// Read a required string field from `monitor.config`.
pub fn require_str<'a>(monitor: &'a Monitor, field: &str) -> Result<&'a str> {
    monitor
        .config
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("monitor {} config missing `{field}`", monitor.id))
}

/// Read a required integer field from `monitor.config`.
pub fn require_i64(monitor: &Monitor, field: &str) -> Result<i64> {
    monitor
        .config
        .get(field)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| anyhow!("monitor {} config missing `{field}`", monitor.id))
}

/// Read an optional bool field, defaulting when absent.
pub fn bool_or(monitor: &Monitor, field: &str, default: bool) -> bool {
    monitor.config.get(field).and_then(|v| v.as_bool()).unwrap_or(default)
}

/// Parses `accepted_statuscodes` entries like `"200-299"` or `"204"`.
/// Defaults to `200-299` when the field is absent, matching the upstream
/// monitor type's documented default.
pub fn accepted_status_ranges(monitor: &Monitor) -> Result<Vec<(u16, u16)>> {
    let Some(codes) = monitor.config.get("accepted_statuscodes").and_then(|v| v.as_array()) else {
        return Ok(vec![(200, 299)]);
    };
    codes
        .iter()
        .map(|v| {
            let raw = v.as_str().context("accepted_statuscodes entries must be strings")?;
            parse_status_range(raw)
        })
        .collect()
}

fn parse_status_range(raw: &str) -> Result<(u16, u16)> {
    if let Some((lo, hi)) = raw.split_once('-') {
        Ok((lo.trim().parse()?, hi.trim().parse()?))
    } else {
        let code: u16 = raw.trim().parse()?;
        Ok((code, code))
    }
}

pub fn status_in_ranges(status: u16, ranges: &[(u16, u16)]) -> bool {
    ranges.iter().any(|(lo, hi)| status >= *lo && status <= *hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_code_and_range() {
        assert_eq!(parse_status_range("204").unwrap(), (204, 204));
        assert_eq!(parse_status_range("200-299").unwrap(), (200, 299));
    }

    #[test]
    fn status_in_ranges_matches_any_range() {
        let ranges = vec![(200, 299), (304, 304)];
        assert!(status_in_ranges(204, &ranges));
        assert!(status_in_ranges(304, &ranges));
        assert!(!status_in_ranges(500, &ranges));
    }
}
