//! Reference data fed to the agents: product catalog, BCT regulation
//! circulars and standard loan simulations.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Regulation {
    pub title: String,
    pub summary: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    products: Vec<Value>,
    regulations: Vec<Regulation>,
}

impl KnowledgeBase {
    pub fn new(products: Vec<Value>, regulations: Vec<Regulation>) -> Self {
        Self {
            products,
            regulations,
        }
    }

    /// Load both files. A missing or unreadable file yields an empty list.
    pub async fn load(catalog_path: &Path, regulations_path: &Path) -> Self {
        let products: Vec<Value> = read_json_list(catalog_path).await;
        let regulations: Vec<Regulation> = read_json_list(regulations_path).await;

        info!(
            products = products.len(),
            regulations = regulations.len(),
            "Knowledge base loaded"
        );

        Self::new(products, regulations)
    }

    pub fn product_catalog(&self) -> &[Value] {
        &self.products
    }

    /// Case-insensitive keyword match on title and summary.
    /// No keywords returns the whole knowledge base.
    pub fn search_regulations(&self, keywords: &[&str]) -> Vec<&Regulation> {
        if keywords.is_empty() {
            return self.regulations.iter().collect();
        }

        let keywords: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();

        self.regulations
            .iter()
            .filter(|reg| {
                let text = format!("{} {}", reg.title, reg.summary).to_lowercase();
                keywords.iter().any(|k| text.contains(k.as_str()))
            })
            .collect()
    }
}

async fn read_json_list<T: serde::de::DeserializeOwned>(path: &Path) -> Vec<T> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(_) => return Vec::new(),
    };

    match serde_json::from_str(&raw) {
        Ok(items) => items,
        Err(e) => {
            warn!(path = %path.display(), "Ignoring unreadable knowledge file: {}", e);
            Vec::new()
        }
    }
}

/// Monthly payment (PMT) for an amortizing loan, rounded to 2 decimals.
pub fn loan_payment(amount: f64, rate_percent: f64, duration_months: u32) -> f64 {
    if duration_months == 0 || amount <= 0.0 {
        return 0.0;
    }
    if rate_percent <= 0.0 {
        return amount / duration_months as f64;
    }

    let r = rate_percent / 100.0 / 12.0;
    let growth = (1.0 + r).powi(duration_months as i32);
    let payment = amount * r * growth / (growth - 1.0);

    (payment * 100.0).round() / 100.0
}

/// Cheat sheet of standard loan costs, embedded in the opportunity prompt.
pub fn standard_simulations() -> String {
    const SCENARIOS: [(f64, f64, u32); 4] = [
        (10_000.0, 10.0, 36),
        (50_000.0, 11.0, 48),
        (100_000.0, 11.0, 60),
        (500_000.0, 12.0, 60),
    ];

    let mut out = String::from("Standard Loan Costs (Cheat Sheet):\n");
    for (amount, rate, months) in SCENARIOS {
        out.push_str(&format!(
            "- {} TND @ {}% for {}m = {} TND/mo\n",
            amount,
            rate,
            months,
            loan_payment(amount, rate, months)
        ));
    }
    out
}

/// Trigger dates for a reminder: the day before and the due day itself.
/// An unparsable date yields no triggers.
pub fn reminder_dates(due_date: &str) -> Vec<String> {
    match NaiveDate::parse_from_str(due_date.trim(), "%Y-%m-%d") {
        Ok(due) => vec![
            (due - Duration::days(1)).format("%Y-%m-%d").to_string(),
            due.format("%Y-%m-%d").to_string(),
        ],
        Err(_) => Vec::new(),
    }
}
