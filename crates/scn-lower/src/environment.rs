use std::collections::BTreeMap;

use scn_core::{parse_number, LowerError, WeatherFrame};
use scn_parser::XmlElementNode;
use tracing::debug;

use crate::context::LowerContext;

const DEFAULT_WIND_SPEED: f64 = 1.0;
const DEFAULT_TEMPERATURE_C: f64 = 30.0;
const KELVIN_OFFSET: f64 = 273.15;

/// Reads the weather frame of a global `EnvironmentAction`.
///
/// The environment is inline or a catalog reference. Its own parameter
/// declarations carry the frame timestamp, wind speed and temperature (K).
pub fn weather_frame(ctx: &mut LowerContext<'_>, action: &XmlElementNode) -> Option<WeatherFrame> {
    let environment = match action.child("Environment") {
        Some(environment) => environment.clone(),
        None => {
            let reference = action.child("CatalogReference")?;
            let entry_name = ctx.attr_or(reference, "entryName", "");
            match ctx.catalog.store().environment(&entry_name) {
                Some(environment) => environment,
                None => {
                    ctx.diagnostics.record(&LowerError::CatalogMiss {
                        kind: "EnvironmentCatalog".to_string(),
                        name: entry_name,
                    });
                    return None;
                }
            }
        }
    };

    let declared = environment
        .child("ParameterDeclarations")
        .map(|declarations| {
            declarations
                .children_named("ParameterDeclaration")
                .filter_map(|declaration| {
                    Some((
                        declaration.attr("name")?.to_string(),
                        declaration.attr("value")?.to_string(),
                    ))
                })
                .collect::<BTreeMap<_, _>>()
        })
        .unwrap_or_default();

    let timestamp = declared
        .get("TimeStamp")
        .map(|raw| parse_number(raw) as i64)
        .unwrap_or_default();
    let wind_speed = declared
        .get("wind_speed")
        .map(|raw| parse_number(raw))
        .unwrap_or(DEFAULT_WIND_SPEED);
    let temperature_c = declared
        .get("temperature")
        .or_else(|| declared.get("tmperature"))
        .map(|raw| parse_number(raw) - KELVIN_OFFSET)
        .unwrap_or(DEFAULT_TEMPERATURE_C);

    let weather = environment.child("Weather");
    let precipitation = weather.and_then(|weather| weather.child("Precipitation"));
    let frame = WeatherFrame {
        timestamp,
        date_time: environment
            .child("TimeOfDay")
            .map(|time| ctx.attr_or(time, "dateTime", ""))
            .unwrap_or_default(),
        visual_range_km: weather
            .and_then(|weather| weather.child("Fog"))
            .map(|fog| ctx.value(fog, "visualRange") / 1000.0)
            .unwrap_or_default(),
        precipitation_type: precipitation
            .map(|precipitation| ctx.attr_or(precipitation, "precipitationType", ""))
            .unwrap_or_default(),
        precipitation_intensity: precipitation
            .map(|precipitation| ctx.value(precipitation, "intensity"))
            .unwrap_or_default(),
        cloud_state: weather
            .map(|weather| ctx.attr_or(weather, "cloudState", ""))
            .unwrap_or_default(),
        wind_speed,
        temperature_c,
    };
    debug!(timestamp = frame.timestamp, "weather frame read");
    Some(frame)
}
