use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Value};
use url::{Position, Url};

use crate::types::{UnitType, UserContext, Zone1Mode};
use crate::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://melcloudhome.com";
pub const USER_CONTEXT_PATH: &str = "/api/user/context";

pub const DEFAULT_LOGIN_PATH: &str = "/bff/login?returnUrl=/dashboard";
pub const DEFAULT_IDENTITY_MARKER: &str = "amazoncognito.com";
pub const DEFAULT_DASHBOARD_MARKER: &str = "dashboard";

pub const CSRF_HEADER: &str = "x-csrf";
pub const CSRF_FIELD: &str = "_csrf";
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

pub fn unit_path(unit_type: UnitType, unit_id: &str) -> String {
    format!("/api/{}/{}", unit_type.endpoint_segment(), unit_id)
}

pub fn set_target_temperature_data(temperature: i64) -> Value {
    json!({ "setTemperatureZone1": temperature })
}

/// Turning on optionally restates the zone 1 mode so the unit resumes heating.
pub fn set_power_data(on: bool, zone1: Option<Zone1Mode>) -> Value {
    match (on, zone1) {
        (true, Some(mode)) => json!({
            "power": true,
            "operationModeZone1": mode.as_api_str(),
        }),
        _ => json!({ "power": on }),
    }
}

pub fn set_tank_water_temperature_data(temperature: i64) -> Value {
    json!({ "setTankWaterTemperature": temperature })
}

pub fn set_forced_hot_water_data(enabled: bool) -> Value {
    json!({ "forcedHotWaterMode": enabled })
}

pub fn set_operation_mode_zone1_data(mode: Zone1Mode) -> Value {
    json!({ "operationModeZone1": mode.as_api_str() })
}

/// A `null` body or an empty object counts as no context at all.
pub fn parse_user_context(body: &str) -> Result<UserContext> {
    let raw: Value = serde_json::from_str(body)?;
    match &raw {
        Value::Null => return Err(Error::EmptyContext),
        Value::Object(map) if map.is_empty() => return Err(Error::EmptyContext),
        _ => {}
    }
    Ok(serde_json::from_value(raw)?)
}

/// Where the login entry point left us after following redirects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginLanding {
    IdentityProvider,
    Dashboard,
    Unexpected,
}

/// The identity marker is matched against the origin (scheme, host, port) and
/// the dashboard marker against the path, so query strings such as
/// `returnUrl=/dashboard` never count as arrival.
pub fn classify_landing(url: &Url, identity_marker: &str, dashboard_marker: &str) -> LoginLanding {
    if url[..Position::BeforePath].contains(identity_marker) {
        LoginLanding::IdentityProvider
    } else if url.path().contains(dashboard_marker) {
        LoginLanding::Dashboard
    } else {
        LoginLanding::Unexpected
    }
}

static INPUT_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<input\b[^>]*>").expect("static regex"));
static TAG_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(name|value)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("static regex")
});

/// Value of the hidden anti-forgery `<input name="_csrf">` on the login page.
pub fn extract_csrf_token(html: &str) -> Option<String> {
    for tag in INPUT_TAG.find_iter(html) {
        let mut name = None;
        let mut value = None;
        for cap in TAG_ATTR.captures_iter(tag.as_str()) {
            let attr = cap.get(2).or_else(|| cap.get(3)).map(|m| m.as_str());
            match cap[1].to_ascii_lowercase().as_str() {
                "name" => name = attr,
                "value" => value = attr,
                _ => {}
            }
        }
        if name == Some(CSRF_FIELD)
            && let Some(v) = value
            && !v.is_empty()
        {
            return Some(unescape_html(v));
        }
    }
    None
}

fn unescape_html(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x2B;", "+")
        .replace("&#x3D;", "=")
        .replace("&#x2F;", "/")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_paths_per_type() {
        assert_eq!(unit_path(UnitType::AirToWater, "U1"), "/api/atwunit/U1");
        assert_eq!(unit_path(UnitType::AirToAir, "A9"), "/api/ataunit/A9");
    }

    #[test]
    fn partial_state_bodies_are_sparse() {
        assert_eq!(
            set_tank_water_temperature_data(22),
            json!({"setTankWaterTemperature": 22})
        );
        assert_eq!(set_forced_hot_water_data(true), json!({"forcedHotWaterMode": true}));
        assert_eq!(
            set_operation_mode_zone1_data(Zone1Mode::HeatCurve),
            json!({"operationModeZone1": "HeatCurve"})
        );
        assert_eq!(set_power_data(false, Some(Zone1Mode::HeatCurve)), json!({"power": false}));
        assert_eq!(
            set_power_data(true, Some(Zone1Mode::HeatFlowTemperature)),
            json!({"power": true, "operationModeZone1": "HeatFlowTemperature"})
        );
    }

    #[test]
    fn parse_context_rejects_empty() {
        assert!(matches!(parse_user_context("null"), Err(Error::EmptyContext)));
        assert!(matches!(parse_user_context("{}"), Err(Error::EmptyContext)));
        assert!(matches!(parse_user_context("<html>"), Err(Error::Decode(_))));
    }

    #[test]
    fn parse_context_tolerates_null_lists() {
        let ctx = parse_user_context(
            r#"{"firstname": "Ada", "buildings": [{"id": "B1", "name": "Home", "airToAirUnits": null}]}"#,
        )
        .unwrap();
        assert_eq!(ctx.buildings.len(), 1);
        assert!(ctx.buildings[0].air_to_air_units.is_empty());
        assert!(ctx.buildings[0].air_to_water_units.is_empty());
    }

    #[test]
    fn csrf_token_either_attribute_order() {
        let html = r#"<form><input type="hidden" name="_csrf" value="abc123"/></form>"#;
        assert_eq!(extract_csrf_token(html).as_deref(), Some("abc123"));

        let html = r#"<input value='tok&amp;en' type='hidden' name='_csrf'>"#;
        assert_eq!(extract_csrf_token(html).as_deref(), Some("tok&en"));
    }

    #[test]
    fn csrf_token_missing() {
        let html = r#"<form><input name="username"><input name="password"></form>"#;
        assert_eq!(extract_csrf_token(html), None);
        assert_eq!(extract_csrf_token(r#"<input name="_csrf" value="">"#), None);
    }

    fn landing(url: &str) -> LoginLanding {
        let url = Url::parse(url).unwrap();
        classify_landing(&url, DEFAULT_IDENTITY_MARKER, DEFAULT_DASHBOARD_MARKER)
    }

    #[test]
    fn landing_classification() {
        assert_eq!(
            landing("https://live.auth.eu-west-1.amazoncognito.com/login?x=1"),
            LoginLanding::IdentityProvider
        );
        assert_eq!(landing("https://melcloudhome.com/dashboard"), LoginLanding::Dashboard);
        assert_eq!(landing("https://melcloudhome.com/maintenance"), LoginLanding::Unexpected);
    }

    #[test]
    fn return_url_query_is_not_arrival() {
        assert_eq!(
            landing("https://melcloudhome.com/bff/login?returnUrl=/dashboard"),
            LoginLanding::Unexpected
        );
    }
}
