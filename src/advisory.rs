//! Advisory gateway: LLM commentary on the recent price action and
//! generated order scripts.
//!
//! Advice is non-authoritative. The helpers here copy what they need from
//! the engine under its lock, release the lock, and only then await the
//! collaborator, bounded by a timeout. Failures turn into an `ERROR` event
//! and a fallback message; the order book is never touched.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::{
    errors::AdvisoryError,
    events::Level,
    instrument::Pair,
    orders::NewOrder,
    state::AppState,
};

/// Fewer ticks than this and trend analysis is refused.
pub const MIN_ANALYSIS_POINTS: usize = 10;
/// Trend prompts only carry the most recent prices.
pub const ANALYSIS_POINTS: usize = 20;

pub const ANALYSIS_FALLBACK: &str = "Error connecting to AI analyst.";
pub const SCRIPT_FALLBACK: &str = "# Error generating Python code.";

#[async_trait]
pub trait AdvisoryGateway: Send + Sync {
    /// Commentary on `prices`, oldest first.
    async fn analyze_trend(&self, pair: Pair, prices: &[Decimal]) -> Result<String, AdvisoryError>;

    /// A script that would place `order` on the exchange testnet.
    async fn generate_script(&self, pair: Pair, order: &NewOrder) -> Result<String, AdvisoryError>;
}

/// What the advisory endpoints hand back to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advice {
    pub ok: bool,
    pub text: String,
}

pub fn trend_prompt(pair: Pair, prices: &[Decimal]) -> String {
    let list = prices
        .iter()
        .map(Decimal::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Analyze the following recent price trend for {}.\n\
         Prices (oldest to newest): [{}].\n\
         Provide a concise 2-sentence market sentiment analysis (Bullish/Bearish/Neutral) \
         and a suggested short-term action.",
        pair, list
    )
}

pub fn script_prompt(pair: Pair, order: &NewOrder) -> String {
    let mut params = format!(
        "- Symbol: {}\n- Side: {}\n- Type: {}\n- Quantity: {}\n",
        pair,
        order.side,
        order.order_type.as_str(),
        order.quantity
    );
    if let Some(p) = order.limit_price {
        params.push_str(&format!("- Price: {}\n", p));
    }
    if let Some(s) = order.stop_price {
        params.push_str(&format!("- Stop price: {}\n", s));
    }
    format!(
        "Generate a Python script using the 'python-binance' library to place a specific order \
         on the Binance Futures Testnet.\n\nParameters:\n{}\nRequirements:\n\
         - Include authentication setup (placeholders for API_KEY/SECRET).\n\
         - Use the Testnet URL.\n\
         - Add error handling.\n\
         - Return ONLY the python code block, no markdown formatting.",
        params
    )
}

/// Removes markdown code fences a model may wrap a script in.
pub fn strip_code_fences(text: &str) -> String {
    text.replace("```python", "").replace("```", "").trim().to_string()
}

/// Google Gemini `generateContent` client.
pub struct GeminiAdvisor {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

pub const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

impl GeminiAdvisor {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: GEMINI_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        self.base_url = base.into();
        self
    }

    async fn generate(
        &self,
        prompt: String,
        system: Option<&str>,
        temperature: Option<f32>,
    ) -> Result<String, AdvisoryError> {
        let mut body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        });
        if let Some(sys) = system {
            body["systemInstruction"] = json!({ "parts": [{ "text": sys }] });
        }
        if let Some(t) = temperature {
            body["generationConfig"] = json!({ "temperature": t });
        }

        let resp: GenerateResponse = self
            .client
            .post(format!(
                "{}/models/{}:generateContent",
                self.base_url, self.model
            ))
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let text: String = resp
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.text)
            .collect();
        if text.trim().is_empty() {
            return Err(AdvisoryError::Empty);
        }
        Ok(text)
    }
}

#[async_trait]
impl AdvisoryGateway for GeminiAdvisor {
    async fn analyze_trend(&self, pair: Pair, prices: &[Decimal]) -> Result<String, AdvisoryError> {
        self.generate(
            trend_prompt(pair, prices),
            Some("You are an expert cryptocurrency trading bot analyst. Be concise and technical."),
            Some(0.3),
        )
        .await
    }

    async fn generate_script(&self, pair: Pair, order: &NewOrder) -> Result<String, AdvisoryError> {
        let raw = self.generate(script_prompt(pair, order), None, None).await?;
        Ok(strip_code_fences(&raw))
    }
}

async fn bounded<T>(
    limit: Duration,
    fut: impl std::future::Future<Output = Result<T, AdvisoryError>>,
) -> Result<T, AdvisoryError> {
    timeout(limit, fut).await.map_err(|_| AdvisoryError::Timeout)?
}

/// Asks the gateway for commentary on the recent window.
///
/// Refuses with `InsufficientData` (and a `WARN` event) while the window
/// holds fewer than [`MIN_ANALYSIS_POINTS`] ticks.
pub async fn request_analysis(state: &AppState) -> Result<Advice, AdvisoryError> {
    let advisor = state.advisor.clone().ok_or(AdvisoryError::NotConfigured)?;
    let pair = state.config.pair;

    let prices = {
        let mut engine = state.engine();
        let prices = engine.window().prices();
        if prices.len() < MIN_ANALYSIS_POINTS {
            engine.log(
                Level::Warn,
                "Insufficient data for analysis. Collecting more price points...",
            );
            return Err(AdvisoryError::InsufficientData {
                have: prices.len(),
                need: MIN_ANALYSIS_POINTS,
            });
        }
        engine.log(Level::Info, "Requesting market analysis...");
        let skip = prices.len().saturating_sub(ANALYSIS_POINTS);
        prices[skip..].to_vec()
    };

    let result = bounded(
        state.config.advisory_timeout,
        advisor.analyze_trend(pair, &prices),
    )
    .await;
    Ok(settle(state, result, "Analysis received.", ANALYSIS_FALLBACK))
}

/// Asks the gateway for a script placing `order`. The order itself is not
/// placed.
pub async fn request_script(state: &AppState, order: &NewOrder) -> Result<Advice, AdvisoryError> {
    let advisor = state.advisor.clone().ok_or(AdvisoryError::NotConfigured)?;
    let pair = state.config.pair;
    state
        .engine()
        .log(Level::Info, "Generating Python-Binance code...");

    let result = bounded(
        state.config.advisory_timeout,
        advisor.generate_script(pair, order),
    )
    .await;
    Ok(settle(state, result, "Code snippet generated.", SCRIPT_FALLBACK))
}

fn settle(
    state: &AppState,
    result: Result<String, AdvisoryError>,
    done: &str,
    fallback: &str,
) -> Advice {
    match result {
        Ok(text) => {
            info!("advisory call succeeded");
            state.engine().log(Level::Success, done);
            Advice { ok: true, text }
        }
        Err(e) => {
            warn!("advisory call failed: {}", e);
            state
                .engine()
                .log(Level::Error, format!("Advisory request failed: {}", e));
            Advice {
                ok: false,
                text: fallback.to_string(),
            }
        }
    }
}
