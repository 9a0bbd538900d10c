use super::{ToolClients, ToolFailure, call_webhook};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

const LABEL: &str = "Calendar";
const TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_MAX_EVENTS: i64 = 10;
/// Events read aloud before the rest are summarised as a count.
const SPOKEN_EVENTS: usize = 10;

const TIME_RANGES: [&str; 5] = ["today", "tomorrow", "this_week", "next_week", "this_month"];
const CALENDAR_TYPES: [&str; 4] = ["all", "meetings", "personal", "work"];

#[derive(Deserialize, JsonSchema, Debug)]
pub struct CalendarArgs {
    #[schemars(
        description = "One of 'today', 'tomorrow', 'this_week', 'next_week', 'this_month'. Defaults to today."
    )]
    pub time_range: Option<String>,
    #[schemars(description = "One of 'all', 'meetings', 'personal', 'work'. Defaults to all.")]
    pub calendar_type: Option<String>,
    #[schemars(description = "Maximum number of events to fetch, 1 to 20. Defaults to 10.")]
    pub max_events: Option<i64>,
}

fn pick<'a>(value: Option<&str>, allowed: &[&'a str]) -> &'a str {
    let value = value.map(|v| v.trim().to_lowercase());
    allowed
        .iter()
        .copied()
        .find(|candidate| value.as_deref() == Some(*candidate))
        .unwrap_or(allowed[0])
}

fn parse_moment(raw: &str, today: NaiveDate) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Local).naive_local());
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt);
        }
    }
    for format in ["%H:%M", "%H:%M:%S"] {
        if let Ok(time) = NaiveTime::parse_from_str(raw, format) {
            return Some(today.and_time(time));
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|date| date.and_time(NaiveTime::MIN))
}

/// Renders a start (and optional end) time for speech; unparseable input is returned as-is.
fn format_event_time(start: &str, end: &str, today: NaiveDate) -> String {
    let Some(parsed_start) = parse_moment(start, today) else {
        return start.to_string();
    };
    let mut out = if parsed_start.date() == today {
        parsed_start.format("%H:%M").to_string()
    } else {
        parsed_start.format("%B %d at %H:%M").to_string()
    };
    if let Some(parsed_end) = parse_moment(end, today) {
        out.push_str(&format!(" to {}", parsed_end.format("%H:%M")));
    }
    out
}

fn field<'a>(event: &'a Value, key: &str) -> &'a str {
    event.get(key).and_then(Value::as_str).unwrap_or("")
}

fn describe_event(index: usize, event: &Value, today: NaiveDate) -> String {
    let text = |key| field(event, key);
    let title = Some(text("title"))
        .filter(|t| !t.is_empty())
        .unwrap_or("Untitled Event");

    let mut parts = vec![format!("{index}. {title}")];
    if !text("startTime").is_empty() {
        parts.push(format!(
            "at {}",
            format_event_time(text("startTime"), text("endTime"), today)
        ));
    }
    if !text("location").is_empty() {
        parts.push(format!("in {}", text("location")));
    }
    match event.get("attendees").and_then(Value::as_array).map(Vec::len) {
        Some(1) => parts.push("with 1 attendee".to_string()),
        Some(n) if n > 1 => parts.push(format!("with {n} attendees")),
        _ => {}
    }
    parts.join(" ")
}

fn format_events(
    events: &[Value],
    time_range: &str,
    calendar_type: &str,
    summary: &str,
    today: NaiveDate,
) -> String {
    let range = time_range.replace('_', " ");
    let mut parts: Vec<String> = Vec::new();
    if !summary.is_empty() {
        parts.push(summary.to_string());
    }

    if events.is_empty() {
        parts.push(format!("You have no {calendar_type} events scheduled for {range}."));
        return parts.join(" ");
    }

    parts.push(match events.len() {
        1 => format!("You have 1 event scheduled for {range}:"),
        n => format!("You have {n} events scheduled for {range}:"),
    });
    parts.extend(
        events
            .iter()
            .take(SPOKEN_EVENTS)
            .enumerate()
            .map(|(i, event)| describe_event(i + 1, event, today)),
    );
    if events.len() > SPOKEN_EVENTS {
        parts.push(format!("Plus {} more events.", events.len() - SPOKEN_EVENTS));
    }
    parts.join(" ")
}

pub async fn run(clients: &ToolClients, args: CalendarArgs) -> Result<String, ToolFailure> {
    let time_range = pick(args.time_range.as_deref(), &TIME_RANGES);
    let calendar_type = pick(args.calendar_type.as_deref(), &CALENDAR_TYPES);
    let max_events = args.max_events.unwrap_or(DEFAULT_MAX_EVENTS).clamp(1, 20);

    let params = json!({
        "timeRange": time_range,
        "calendarType": calendar_type,
        "maxEvents": max_events,
    });
    let response = call_webhook(
        &clients.http,
        clients.settings.calendar_url.as_deref(),
        "calendar",
        params,
        clients.timeout(TIMEOUT),
    )
    .await
    .map_err(|e| ToolFailure::from_service(LABEL, &e))?;

    let events = response
        .get("events")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let summary = response.get("message").and_then(Value::as_str).unwrap_or("");

    Ok(format_events(
        events,
        time_range,
        calendar_type,
        summary,
        Local::now().date_naive(),
    ))
}
