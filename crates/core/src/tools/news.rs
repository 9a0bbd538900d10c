use super::{ToolClients, ToolFailure};
use crate::activity::SharedActivityLog;
use crate::lesson::parse_lesson;

pub const UNAVAILABLE: &str = "News service is currently unavailable.";

/// Fetches the lesson source again and returns just its digest.
pub async fn run(clients: &ToolClients, log: &SharedActivityLog) -> Result<String, ToolFailure> {
    let raw = clients
        .news
        .fetch(log)
        .await
        .ok_or_else(|| ToolFailure::new("unavailable", UNAVAILABLE))?;

    let digest = parse_lesson(&raw).digest;
    if digest.trim().is_empty() {
        return Ok("There is no news in today's digest.".to_string());
    }
    Ok(format!("Here is today's news digest:\n{digest}"))
}
