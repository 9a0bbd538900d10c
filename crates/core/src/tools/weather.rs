use super::{ToolClients, ToolFailure, call_webhook};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

const LABEL: &str = "Weather";
const TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Deserialize, JsonSchema, Debug)]
pub struct WeatherArgs {
    /// City name, e.g. "London" or "Tokyo".
    pub city: String,
    #[schemars(description = "Temperature units: 'celsius' or 'fahrenheit'. Defaults to celsius.")]
    pub units: Option<String>,
}

fn normalize_units(units: Option<&str>) -> &'static str {
    match units.map(|u| u.trim().to_lowercase()).as_deref() {
        Some("fahrenheit") => "fahrenheit",
        _ => "celsius",
    }
}

pub async fn run(clients: &ToolClients, args: WeatherArgs) -> Result<String, ToolFailure> {
    let city = args.city.trim();
    if city.is_empty() {
        return Err(ToolFailure::new(
            "invalid_argument",
            "Please tell me which city you want the weather for.",
        ));
    }

    let params = json!({
        "city": city,
        "units": normalize_units(args.units.as_deref()),
        "date": "today",
    });
    let response = call_webhook(
        &clients.http,
        clients.settings.weather_url.as_deref(),
        "weather",
        params,
        clients.timeout(TIMEOUT),
    )
    .await
    .map_err(|e| ToolFailure::from_service(LABEL, &e))?;

    Ok(response
        .get("message")
        .and_then(Value::as_str)
        .filter(|m| !m.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("I couldn't find weather details for {city} right now.")))
}
