use super::{ToolClients, ToolFailure, call_webhook};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

const LABEL: &str = "Trade analysis";
const TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_DAYS: i64 = 30;
const DETAIL_LINES: usize = 3;

#[derive(Deserialize, JsonSchema, Debug)]
pub struct TradeArgs {
    #[schemars(description = "Number of days to analyze, 1 to 365. Defaults to 30.")]
    pub days_ago: Option<i64>,
    #[schemars(description = "Which products to report: 'top', 'worst', or 'both'. Defaults to both.")]
    pub analysis_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Analysis {
    Top,
    Worst,
    Both,
}

impl Analysis {
    fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_lowercase()).as_deref() {
            Some("top") => Self::Top,
            Some("worst") => Self::Worst,
            _ => Self::Both,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Top => "top",
            Self::Worst => "worst",
            Self::Both => "both",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Product {
    name: String,
    sold: f64,
}

fn products_of(group: &Value) -> Vec<Product> {
    group
        .get("products")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|p| Product {
                    name: p
                        .get("productName")
                        .and_then(Value::as_str)
                        .unwrap_or("Unknown")
                        .to_string(),
                    sold: p.get("totalSold").and_then(Value::as_f64).unwrap_or(0.0),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Extracts the TOP and WORST product groups. Groups may be wrapped in a `json` key.
fn split_groups(response: &Value) -> (Vec<Product>, Vec<Product>) {
    let groups: Vec<&Value> = match response {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };

    let mut top = Vec::new();
    let mut worst = Vec::new();
    for group in groups {
        let group = group.get("json").unwrap_or(group);
        match group.get("type").and_then(Value::as_str) {
            Some("TOP") => top = products_of(group),
            Some("WORST") => worst = products_of(group),
            _ => {}
        }
    }
    (top, worst)
}

fn format_analysis(response: &Value, days: i64, analysis: Analysis) -> String {
    let (top, worst) = split_groups(response);
    if top.is_empty() && worst.is_empty() {
        return format!("No sales data found for the last {days} days.");
    }

    let mut summary = vec![format!("Sales analysis for last {days} days:")];
    if let Some(leader) = top.first() {
        summary.push(format!("Top seller: {} with {:.1} units", leader.name, leader.sold));
    }
    if let Some(laggard) = worst.first() {
        summary.push(format!(
            "Worst performer: {} with {:.1} units",
            laggard.name, laggard.sold
        ));
    }

    // A product can appear in both groups; count it once at its highest volume.
    let mut unique: Vec<(&str, f64)> = Vec::new();
    for product in top.iter().chain(worst.iter()) {
        match unique.iter_mut().find(|(name, _)| *name == product.name) {
            Some((_, sold)) => *sold = sold.max(product.sold),
            None => unique.push((product.name.as_str(), product.sold)),
        }
    }
    let volume: f64 = unique.iter().map(|(_, sold)| sold).sum();
    summary.push(format!(
        "Analysis covers {} products with total {:.1} units sold",
        unique.len(),
        volume
    ));

    let mut out = summary.join(" ") + ".";
    if matches!(analysis, Analysis::Top | Analysis::Both) && !top.is_empty() {
        out.push_str(&detail("Top 3 selling products:", &top));
    }
    if matches!(analysis, Analysis::Worst | Analysis::Both) && !worst.is_empty() {
        out.push_str(&detail("3 worst selling products:", &worst));
    }
    out
}

fn detail(heading: &str, products: &[Product]) -> String {
    let mut out = format!(" {heading}");
    for (i, product) in products.iter().take(DETAIL_LINES).enumerate() {
        out.push_str(&format!(" {}. {}: {:.1} units", i + 1, product.name, product.sold));
    }
    out
}

pub async fn run(clients: &ToolClients, args: TradeArgs) -> Result<String, ToolFailure> {
    let days = args.days_ago.unwrap_or(DEFAULT_DAYS).clamp(1, 365);
    let analysis = Analysis::parse(args.analysis_type.as_deref());

    let params = json!({
        "daysAgo": days,
        "analysisType": analysis.as_str(),
    });
    let response = call_webhook(
        &clients.http,
        clients.settings.trade_url.as_deref(),
        "trade_results",
        params,
        clients.timeout(TIMEOUT),
    )
    .await
    .map_err(|e| ToolFailure::from_service(LABEL, &e))?;

    Ok(format_analysis(&response, days, analysis))
}
