//! Market, economic-data, and search-trends tools.
//!
//! Prediction market prices reflect the aggregated wisdom of traders with
//! financial incentives, so they are a strong prior for many questions.
//! Live-price tools (`polymarket_price`, `manifold_price`, `stock_price`)
//! are excluded by policy in retrodict mode — there is no reliable
//! historical equivalent of "the price right now" — while the `_history`
//! tools stay available with their end timestamps capped at the cutoff by
//! the retrodict hook. The same capping applies to FRED `observation_end`
//! and to trends timeframes.

use crate::session::Session;
use crate::tools::{Tool, limit_arg, opt_str_arg, str_arg, tool};
use crate::{Error, Result};
use chrono::{NaiveDate, Utc};
use serde_json::{Value, json};
use std::time::Duration;

const POLYMARKET_GAMMA_API: &str = "https://gamma-api.polymarket.com";
const POLYMARKET_CLOB_API: &str = "https://clob.polymarket.com";
const MANIFOLD_API: &str = "https://api.manifold.markets/v0";
const FRED_API: &str = "https://api.stlouisfed.org/fred";
const YAHOO_CHART_API: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
const TRENDS_API: &str = "https://trends.google.com/trends/api";

fn http(session: &Session) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(
            session.services.settings.http_timeout_seconds,
        ))
        .user_agent("Mozilla/5.0 (compatible; forecast-agent/0.4)")
        .build()?)
}

async fn get_json(session: &Session, url: &str, params: &[(&str, String)]) -> Result<Value> {
    crate::retry::retry_if_transient(crate::retry::RetryConfig::default(), || async {
        let response = http(session)?.get(url).query(params).send().await?;
        if !response.status().is_success() {
            return Err(Error::api(format!("HTTP {}: {url}", response.status())));
        }
        Ok(response.json().await?)
    })
    .await
}

// ============================================================================
// POLYMARKET
// ============================================================================

/// Parse the YES price out of Polymarket's `outcomePrices`, which shows up
/// as a list of floats, a list of strings, or a string-encoded list
/// depending on the endpoint and era.
fn parse_yes_price(outcome_prices: &Value) -> Option<f64> {
    let first = match outcome_prices {
        Value::Array(items) => items.first()?.clone(),
        Value::String(s) if s.starts_with('[') => {
            let parsed: Value = serde_json::from_str(&s.replace('\'', "\"")).ok()?;
            parsed.as_array()?.first()?.clone()
        }
        other => other.clone(),
    };

    match first {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn parse_polymarket_event(event: &Value) -> Option<Value> {
    let market = event.get("markets")?.as_array()?.first()?;
    let yes_price = parse_yes_price(market.get("outcomePrices")?)?;

    Some(json!({
        "market_title": event.get("title").and_then(|v| v.as_str()).unwrap_or("Unknown"),
        "probability": yes_price,
        "volume": market.get("volume"),
        "url": format!(
            "https://polymarket.com/event/{}",
            event.get("slug").and_then(|v| v.as_str()).unwrap_or("")
        ),
        "source": "polymarket",
    }))
}

async fn search_polymarket_events(session: &Session, query: &str) -> Result<Vec<Value>> {
    let data = get_json(
        session,
        &format!("{POLYMARKET_GAMMA_API}/events"),
        &[
            ("title_contains", query.to_string()),
            ("active", "true".to_string()),
            ("limit", "10".to_string()),
        ],
    )
    .await?;
    Ok(data.as_array().cloned().unwrap_or_default())
}

fn polymarket_price_tool(session: &Session) -> Tool {
    let session = session.clone();
    let default_limit = session.services.settings.market_default_limit;
    tool(
        "polymarket_price",
        format!(
            "Search Polymarket for prediction markets and return current prices. \
             Returns YES price as probability, trading volume, and URL. \
             Optional limit (default: {default_limit})."
        ),
    )
    .schema(json!({
        "query": {"type": "string"},
        "limit": {"type": "integer", "optional": true}
    }))
    .build(move |args| {
        let session = session.clone();
        async move {
            let query = str_arg(&args, "query")?.to_string();
            let limit = limit_arg(&args, "limit", default_limit, 50);

            let events = search_polymarket_events(&session, &query).await?;
            let markets: Vec<Value> = events
                .iter()
                .take(limit)
                .filter_map(parse_polymarket_event)
                .collect();

            Ok(json!({"markets": markets, "query": query}))
        }
    })
}

fn polymarket_history_tool(session: &Session) -> Tool {
    let session = session.clone();
    tool(
        "polymarket_history",
        "Fetch the price history of the best-matching Polymarket market. Returns a \
         daily time series of YES prices. Optional end_date (YYYY-MM-DD) caps the \
         series.",
    )
    .schema(json!({
        "query": {"type": "string"},
        "end_date": {"type": "string", "optional": true}
    }))
    .build(move |args| {
        let session = session.clone();
        async move {
            let query = str_arg(&args, "query")?.to_string();
            let end_ts = end_timestamp(&args, session.cutoff.map(|c| c.unix_ts()))?;

            let events = search_polymarket_events(&session, &query).await?;
            let market = events
                .iter()
                .filter_map(|e| e.get("markets").and_then(|m| m.as_array()))
                .flatten()
                .next()
                .ok_or_else(|| Error::tool(format!("No Polymarket market found for '{query}'")))?;

            // clobTokenIds is a JSON-encoded array; the first token is YES.
            let token_id = market
                .get("clobTokenIds")
                .and_then(|v| v.as_str())
                .and_then(|s| serde_json::from_str::<Value>(s).ok())
                .and_then(|v| v.as_array().and_then(|a| a.first().cloned()))
                .and_then(|v| v.as_str().map(String::from))
                .ok_or_else(|| Error::tool("Market has no price history token"))?;

            let data = get_json(
                &session,
                &format!("{POLYMARKET_CLOB_API}/prices-history"),
                &[
                    ("market", token_id),
                    ("interval", "max".to_string()),
                    ("fidelity", "1440".to_string()),
                ],
            )
            .await?;

            let history: Vec<Value> = data
                .get("history")
                .and_then(|h| h.as_array())
                .map(|points| {
                    points
                        .iter()
                        .filter(|p| {
                            p.get("t")
                                .and_then(|v| v.as_i64())
                                .map(|t| t <= end_ts)
                                .unwrap_or(false)
                        })
                        .map(|p| json!({"timestamp": p["t"], "price": p["p"]}))
                        .collect()
                })
                .unwrap_or_default();

            Ok(json!({
                "query": query,
                "market_title": market.get("question"),
                "data_points": history.len(),
                "history": history,
            }))
        }
    })
}

// ============================================================================
// MANIFOLD
// ============================================================================

fn parse_manifold_market(market: &Value) -> Value {
    json!({
        "market_title": market.get("question").and_then(|v| v.as_str()).unwrap_or("Unknown"),
        "probability": market.get("probability").and_then(|v| v.as_f64()).unwrap_or(0.5),
        "volume": market.get("volume"),
        "url": market.get("url").and_then(|v| v.as_str()).map(String::from).unwrap_or_else(
            || format!(
                "https://manifold.markets/{}",
                market.get("slug").and_then(|v| v.as_str()).unwrap_or("")
            )
        ),
        "source": "manifold",
    })
}

fn manifold_price_tool(session: &Session) -> Tool {
    let session = session.clone();
    let default_limit = session.services.settings.market_default_limit;
    tool(
        "manifold_price",
        format!(
            "Search Manifold Markets for prediction markets and return current prices. \
             Returns probability, trading volume (in mana), and URL. \
             Optional limit (default: {default_limit})."
        ),
    )
    .schema(json!({
        "query": {"type": "string"},
        "limit": {"type": "integer", "optional": true}
    }))
    .build(move |args| {
        let session = session.clone();
        async move {
            let query = str_arg(&args, "query")?.to_string();
            let limit = limit_arg(&args, "limit", default_limit, 50);

            let data = get_json(
                &session,
                &format!("{MANIFOLD_API}/search-markets"),
                &[
                    ("term", query.clone()),
                    ("limit", "10".to_string()),
                    ("filter", "open".to_string()),
                    ("sort", "score".to_string()),
                ],
            )
            .await?;

            let markets: Vec<Value> = data
                .as_array()
                .map(|items| items.iter().take(limit).map(parse_manifold_market).collect())
                .unwrap_or_default();

            Ok(json!({"markets": markets, "query": query}))
        }
    })
}

fn manifold_history_tool(session: &Session) -> Tool {
    let session = session.clone();
    tool(
        "manifold_history",
        "Fetch the probability history of a Manifold market by slug (the last path \
         segment of its URL). Returns bet-level probability points. Optional end_date \
         (YYYY-MM-DD) caps the series.",
    )
    .schema(json!({
        "slug": {"type": "string"},
        "end_date": {"type": "string", "optional": true}
    }))
    .build(move |args| {
        let session = session.clone();
        async move {
            let slug = str_arg(&args, "slug")?.to_string();
            let end_ms = end_timestamp(&args, session.cutoff.map(|c| c.unix_ts()))? * 1000;

            let bets = get_json(
                &session,
                &format!("{MANIFOLD_API}/bets"),
                &[("contractSlug", slug.clone()), ("limit", "1000".to_string())],
            )
            .await?;

            let mut history: Vec<Value> = bets
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter(|bet| {
                            bet.get("createdTime")
                                .and_then(|v| v.as_i64())
                                .map(|t| t <= end_ms)
                                .unwrap_or(false)
                        })
                        .filter_map(|bet| {
                            let prob = bet.get("probAfter")?.as_f64()?;
                            Some(json!({
                                "timestamp_ms": bet["createdTime"],
                                "probability": prob,
                            }))
                        })
                        .collect()
                })
                .unwrap_or_default();
            history.reverse(); // API returns newest first

            Ok(json!({
                "slug": slug,
                "data_points": history.len(),
                "history": history,
            }))
        }
    })
}

// ============================================================================
// STOCKS
// ============================================================================

fn stock_price_tool(session: &Session) -> Tool {
    let session = session.clone();
    tool(
        "stock_price",
        "Get the current market price for a stock or index by ticker symbol \
         (e.g., TSLA, ^GSPC). Returns the latest quote with currency and exchange.",
    )
    .param("symbol", "string")
    .build(move |args| {
        let session = session.clone();
        async move {
            let symbol = str_arg(&args, "symbol")?.to_uppercase();
            let data = get_json(
                &session,
                &format!("{YAHOO_CHART_API}/{symbol}"),
                &[("range", "1d".to_string()), ("interval", "1d".to_string())],
            )
            .await?;

            let meta = data
                .get("chart")
                .and_then(|c| c.get("result"))
                .and_then(|r| r.as_array())
                .and_then(|r| r.first())
                .and_then(|r| r.get("meta"))
                .ok_or_else(|| Error::tool(format!("No quote data for {symbol}")))?;

            Ok(json!({
                "symbol": symbol,
                "price": meta.get("regularMarketPrice"),
                "previous_close": meta.get("chartPreviousClose"),
                "currency": meta.get("currency"),
                "exchange": meta.get("exchangeName"),
            }))
        }
    })
}

fn stock_history_tool(session: &Session) -> Tool {
    let session = session.clone();
    tool(
        "stock_history",
        "Get historical daily closes for a stock or index by ticker symbol. Optional \
         start_date and end_date (YYYY-MM-DD); defaults to the last year.",
    )
    .schema(json!({
        "symbol": {"type": "string"},
        "start_date": {"type": "string", "optional": true},
        "end_date": {"type": "string", "optional": true}
    }))
    .build(move |args| {
        let session = session.clone();
        async move {
            let symbol = str_arg(&args, "symbol")?.to_uppercase();
            let period2 = end_timestamp(&args, session.cutoff.map(|c| c.unix_ts()))?;
            let period1 = opt_str_arg(&args, "start_date")
                .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc().timestamp())
                .unwrap_or(period2 - 365 * 86400);

            let data = get_json(
                &session,
                &format!("{YAHOO_CHART_API}/{symbol}"),
                &[
                    ("period1", period1.to_string()),
                    ("period2", period2.to_string()),
                    ("interval", "1d".to_string()),
                ],
            )
            .await?;

            let result = data
                .get("chart")
                .and_then(|c| c.get("result"))
                .and_then(|r| r.as_array())
                .and_then(|r| r.first())
                .ok_or_else(|| Error::tool(format!("No history for {symbol}")))?;

            let timestamps = result
                .get("timestamp")
                .and_then(|t| t.as_array())
                .cloned()
                .unwrap_or_default();
            let closes = result
                .get("indicators")
                .and_then(|i| i.get("quote"))
                .and_then(|q| q.as_array())
                .and_then(|q| q.first())
                .and_then(|q| q.get("close"))
                .and_then(|c| c.as_array())
                .cloned()
                .unwrap_or_default();

            let history: Vec<Value> = timestamps
                .iter()
                .zip(closes.iter())
                .filter(|(_, close)| !close.is_null())
                .map(|(ts, close)| json!({"timestamp": ts, "close": close}))
                .collect();

            Ok(json!({
                "symbol": symbol,
                "data_points": history.len(),
                "history": history,
            }))
        }
    })
}

// ============================================================================
// FRED
// ============================================================================

fn fred_series_tool(session: &Session) -> Tool {
    let session = session.clone();
    tool(
        "fred_series",
        "Get historical data for a FRED (Federal Reserve Economic Data) series. \
         Common series: DGS10 (10-year Treasury), DGS3MO (3-month Treasury), FEDFUNDS \
         (Fed Funds Rate), UNRATE (Unemployment), CPIAUCSL (CPI). Returns recent \
         observations and series metadata.",
    )
    .schema(json!({
        "series_id": {"type": "string"},
        "observation_start": {"type": "string", "optional": true},
        "observation_end": {"type": "string", "optional": true}
    }))
    .build(move |args| {
        let session = session.clone();
        async move {
            let api_key = session
                .services
                .settings
                .fred_api_key
                .clone()
                .ok_or_else(|| {
                    Error::config(
                        "FRED_API_KEY not configured. Get a free key at \
                         https://fred.stlouisfed.org/docs/api/api_key.html",
                    )
                })?;
            let series_id = str_arg(&args, "series_id")?.to_uppercase();

            // Cap at the cutoff; default to the last 30 days otherwise.
            let cutoff_str = session.cutoff.map(|c| c.date_str());
            let end_date = cutoff_str
                .or_else(|| opt_str_arg(&args, "observation_end").map(String::from))
                .unwrap_or_else(|| Utc::now().format("%Y-%m-%d").to_string());
            let start_date = opt_str_arg(&args, "observation_start")
                .map(String::from)
                .unwrap_or_else(|| {
                    (Utc::now() - chrono::Duration::days(30))
                        .format("%Y-%m-%d")
                        .to_string()
                });

            let info = get_json(
                &session,
                &format!("{FRED_API}/series"),
                &[
                    ("series_id", series_id.clone()),
                    ("api_key", api_key.clone()),
                    ("file_type", "json".to_string()),
                ],
            )
            .await?;
            let series_info = info
                .get("seriess")
                .and_then(|s| s.as_array())
                .and_then(|s| s.first())
                .cloned()
                .unwrap_or(Value::Null);

            let observations = get_json(
                &session,
                &format!("{FRED_API}/series/observations"),
                &[
                    ("series_id", series_id.clone()),
                    ("api_key", api_key),
                    ("file_type", "json".to_string()),
                    ("observation_start", start_date.clone()),
                    ("observation_end", end_date.clone()),
                ],
            )
            .await?;

            let obs_list: Vec<Value> = observations
                .get("observations")
                .and_then(|o| o.as_array())
                .map(|items| {
                    items
                        .iter()
                        .map(|obs| {
                            // FRED encodes missing values as "."
                            let value = obs
                                .get("value")
                                .and_then(|v| v.as_str())
                                .and_then(|s| s.parse::<f64>().ok());
                            json!({"date": obs["date"], "value": value})
                        })
                        .collect()
                })
                .unwrap_or_default();

            let latest = obs_list
                .iter()
                .rev()
                .find(|obs| !obs["value"].is_null())
                .cloned();

            let tail: Vec<Value> = obs_list.iter().rev().take(30).rev().cloned().collect();
            Ok(json!({
                "series": {
                    "id": series_id,
                    "title": series_info.get("title"),
                    "frequency": series_info.get("frequency"),
                    "units": series_info.get("units"),
                    "seasonal_adjustment": series_info.get("seasonal_adjustment"),
                },
                "latest_value": latest.as_ref().map(|o| o["value"].clone()),
                "latest_date": latest.as_ref().map(|o| o["date"].clone()),
                "observation_start": start_date,
                "observation_end": end_date,
                "data_points": obs_list.len(),
                "observations": tail,
            }))
        }
    })
}

fn fred_search_tool(session: &Session) -> Tool {
    let session = session.clone();
    tool(
        "fred_search",
        "Search FRED for economic data series by keyword. USE THIS when you don't know \
         the series ID for an economic indicator — search for 'inflation', 'GDP', \
         'unemployment', 'interest rate', 'CPI', etc. to find the right series ID, \
         then use fred_series to get the actual data.",
    )
    .schema(json!({
        "query": {"type": "string"},
        "limit": {"type": "integer", "optional": true}
    }))
    .build(move |args| {
        let session = session.clone();
        async move {
            let api_key = session
                .services
                .settings
                .fred_api_key
                .clone()
                .ok_or_else(|| Error::config("FRED_API_KEY not configured"))?;
            let query = str_arg(&args, "query")?.to_string();
            let limit = limit_arg(&args, "limit", 10, 50);

            let data = get_json(
                &session,
                &format!("{FRED_API}/series/search"),
                &[
                    ("search_text", query.clone()),
                    ("api_key", api_key),
                    ("file_type", "json".to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

            let results: Vec<Value> = data
                .get("seriess")
                .and_then(|s| s.as_array())
                .map(|items| {
                    items
                        .iter()
                        .map(|s| {
                            json!({
                                "id": s.get("id"),
                                "title": s.get("title"),
                                "frequency": s.get("frequency"),
                                "units": s.get("units"),
                                "popularity": s.get("popularity"),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();

            Ok(json!({"query": query, "results": results}))
        }
    })
}

fn company_financials_tool(session: &Session) -> Tool {
    let session = session.clone();
    tool(
        "company_financials",
        "Get key financial metrics for a public company by ticker symbol: market cap, \
         revenue, margins, and valuation ratios.",
    )
    .param("symbol", "string")
    .build(move |args| {
        let session = session.clone();
        async move {
            let symbol = str_arg(&args, "symbol")?.to_uppercase();
            let data = get_json(
                &session,
                &format!(
                    "https://query1.finance.yahoo.com/v10/finance/quoteSummary/{symbol}"
                ),
                &[(
                    "modules",
                    "financialData,defaultKeyStatistics,summaryDetail".to_string(),
                )],
            )
            .await?;

            let result = data
                .get("quoteSummary")
                .and_then(|q| q.get("result"))
                .and_then(|r| r.as_array())
                .and_then(|r| r.first())
                .ok_or_else(|| Error::tool(format!("No financial data for {symbol}")))?;

            let raw = |module: &str, field: &str| -> Value {
                result
                    .get(module)
                    .and_then(|m| m.get(field))
                    .and_then(|f| f.get("raw"))
                    .cloned()
                    .unwrap_or(Value::Null)
            };

            Ok(json!({
                "symbol": symbol,
                "market_cap": raw("summaryDetail", "marketCap"),
                "trailing_pe": raw("summaryDetail", "trailingPE"),
                "total_revenue": raw("financialData", "totalRevenue"),
                "profit_margin": raw("financialData", "profitMargins"),
                "total_cash": raw("financialData", "totalCash"),
                "total_debt": raw("financialData", "totalDebt"),
                "shares_outstanding": raw("defaultKeyStatistics", "sharesOutstanding"),
            }))
        }
    })
}

// ============================================================================
// GOOGLE TRENDS
// ============================================================================

/// Relative search-interest direction over a series of 0-100 values.
fn trend_direction(values: &[i64]) -> &'static str {
    if values.len() < 4 {
        return "stable";
    }
    let quarter = values.len() / 4;
    let recent: f64 =
        values[values.len() - quarter..].iter().sum::<i64>() as f64 / quarter as f64;
    let earlier: f64 = values[..values.len() - quarter].iter().sum::<i64>() as f64
        / (values.len() - quarter) as f64;

    if recent > earlier * 1.1 {
        "rising"
    } else if recent < earlier * 0.9 {
        "falling"
    } else {
        "stable"
    }
}

/// Strip the anti-JSON prefix (`)]}'`) Google puts on trends responses.
fn strip_trends_prefix(body: &str) -> &str {
    match body.find('{') {
        Some(pos) => &body[pos..],
        None => body,
    }
}

/// Run the explore request and return the widget list.
async fn trends_explore(session: &Session, keywords: &[&str], timeframe: &str, geo: &str) -> Result<Value> {
    let comparison: Vec<Value> = keywords
        .iter()
        .map(|kw| json!({"keyword": kw, "geo": geo, "time": timeframe}))
        .collect();
    let req = json!({"comparisonItem": comparison, "category": 0, "property": ""})
        .to_string();

    let response = http(session)?
        .get(format!("{TRENDS_API}/explore"))
        .query(&[("hl", "en-US"), ("tz", "0"), ("req", req.as_str())])
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(Error::api(format!(
            "Trends explore returned {}",
            response.status()
        )));
    }
    let body = response.text().await?;
    Ok(serde_json::from_str(strip_trends_prefix(&body))?)
}

fn find_widget<'a>(widgets: &'a Value, id: &str) -> Option<&'a Value> {
    widgets
        .get("widgets")?
        .as_array()?
        .iter()
        .find(|w| w.get("id").and_then(|v| v.as_str()) == Some(id))
}

/// Fetch the interest-over-time series for one or more keywords.
async fn trends_timeline(
    session: &Session,
    keywords: &[&str],
    timeframe: &str,
    geo: &str,
) -> Result<Vec<Value>> {
    let widgets = trends_explore(session, keywords, timeframe, geo).await?;
    let widget = find_widget(&widgets, "TIMESERIES")
        .ok_or_else(|| Error::api("Trends response has no timeseries widget"))?;
    let token = widget
        .get("token")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::api("Trends widget has no token"))?;
    let request = widget
        .get("request")
        .ok_or_else(|| Error::api("Trends widget has no request"))?
        .to_string();

    let response = http(session)?
        .get(format!("{TRENDS_API}/widgetdata/multiline"))
        .query(&[
            ("hl", "en-US"),
            ("tz", "0"),
            ("req", request.as_str()),
            ("token", token),
        ])
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(Error::api(format!(
            "Trends timeline returned {}",
            response.status()
        )));
    }
    let body = response.text().await?;
    let data: Value = serde_json::from_str(strip_trends_prefix(&body))?;

    Ok(data
        .get("default")
        .and_then(|d| d.get("timelineData"))
        .and_then(|t| t.as_array())
        .cloned()
        .unwrap_or_default())
}

fn google_trends_tool(session: &Session) -> Tool {
    let session = session.clone();
    tool(
        "google_trends",
        "Get Google search interest for a keyword over time. Returns relative search \
         interest (0-100) over the specified timeframe with a trend direction. \
         Optional timeframe (default 'today 3-m'; also accepts 'YYYY-MM-DD YYYY-MM-DD' \
         ranges) and geo (default worldwide).",
    )
    .schema(json!({
        "keyword": {"type": "string"},
        "timeframe": {"type": "string", "optional": true},
        "geo": {"type": "string", "optional": true}
    }))
    .build(move |args| {
        let session = session.clone();
        async move {
            let keyword = str_arg(&args, "keyword")?.to_string();
            let timeframe = opt_str_arg(&args, "timeframe").unwrap_or("today 3-m").to_string();
            let geo = opt_str_arg(&args, "geo").unwrap_or("").to_string();

            let _permit = session.services.limits.search().await;
            let timeline = trends_timeline(&session, &[&keyword], &timeframe, &geo).await?;

            let values: Vec<i64> = timeline
                .iter()
                .filter_map(|p| p.get("value")?.as_array()?.first()?.as_i64())
                .collect();
            let points: Vec<Value> = timeline
                .iter()
                .map(|p| {
                    json!({
                        "date": p.get("formattedTime"),
                        "value": p.get("value").and_then(|v| v.as_array()).and_then(|v| v.first()),
                    })
                })
                .collect();

            Ok(json!({
                "keyword": keyword,
                "timeframe": timeframe,
                "geo": geo,
                "direction": trend_direction(&values),
                "latest": values.last(),
                "peak": values.iter().max(),
                "points": points,
            }))
        }
    })
}

fn google_trends_compare_tool(session: &Session) -> Tool {
    let session = session.clone();
    tool(
        "google_trends_compare",
        "Compare Google search interest between up to 5 keywords on the same 0-100 \
         scale. Optional timeframe and geo as in google_trends.",
    )
    .schema(json!({
        "keywords": {"type": "array"},
        "timeframe": {"type": "string", "optional": true},
        "geo": {"type": "string", "optional": true}
    }))
    .build(move |args| {
        let session = session.clone();
        async move {
            let keywords: Vec<String> = args
                .get("keywords")
                .and_then(|v| v.as_array())
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|k| k.as_str().map(String::from))
                        .collect()
                })
                .filter(|k: &Vec<String>| !k.is_empty())
                .ok_or_else(|| Error::invalid_input("Missing 'keywords' list"))?;
            if keywords.len() > 5 {
                return Err(Error::invalid_input("Maximum 5 keywords to compare"));
            }
            let timeframe = opt_str_arg(&args, "timeframe").unwrap_or("today 3-m").to_string();
            let geo = opt_str_arg(&args, "geo").unwrap_or("").to_string();

            let refs: Vec<&str> = keywords.iter().map(|k| k.as_str()).collect();
            let _permit = session.services.limits.search().await;
            let timeline = trends_timeline(&session, &refs, &timeframe, &geo).await?;

            let mut averages = Vec::with_capacity(keywords.len());
            for (i, keyword) in keywords.iter().enumerate() {
                let values: Vec<i64> = timeline
                    .iter()
                    .filter_map(|p| p.get("value")?.as_array()?.get(i)?.as_i64())
                    .collect();
                let avg = if values.is_empty() {
                    0.0
                } else {
                    values.iter().sum::<i64>() as f64 / values.len() as f64
                };
                averages.push(json!({
                    "keyword": keyword,
                    "average": avg,
                    "latest": values.last(),
                    "direction": trend_direction(&values),
                }));
            }

            Ok(json!({
                "keywords": keywords,
                "timeframe": timeframe,
                "geo": geo,
                "comparison": averages,
            }))
        }
    })
}

fn google_trends_related_tool(session: &Session) -> Tool {
    let session = session.clone();
    tool(
        "google_trends_related",
        "Get queries related to a keyword from Google Trends: top related searches \
         and rising ('breakout') searches. Useful for discovering how public \
         attention around a topic is shifting.",
    )
    .schema(json!({
        "keyword": {"type": "string"},
        "timeframe": {"type": "string", "optional": true},
        "geo": {"type": "string", "optional": true}
    }))
    .build(move |args| {
        let session = session.clone();
        async move {
            let keyword = str_arg(&args, "keyword")?.to_string();
            let timeframe = opt_str_arg(&args, "timeframe").unwrap_or("today 3-m").to_string();
            let geo = opt_str_arg(&args, "geo").unwrap_or("").to_string();

            let _permit = session.services.limits.search().await;
            let widgets = trends_explore(&session, &[&keyword], &timeframe, &geo).await?;
            let widget = find_widget(&widgets, "RELATED_QUERIES")
                .ok_or_else(|| Error::api("Trends response has no related-queries widget"))?;
            let token = widget
                .get("token")
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::api("Trends widget has no token"))?;
            let request = widget
                .get("request")
                .ok_or_else(|| Error::api("Trends widget has no request"))?
                .to_string();

            let response = http(&session)?
                .get(format!("{TRENDS_API}/widgetdata/relatedsearches"))
                .query(&[
                    ("hl", "en-US"),
                    ("tz", "0"),
                    ("req", request.as_str()),
                    ("token", token),
                ])
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(Error::api(format!(
                    "Trends related returned {}",
                    response.status()
                )));
            }
            let body = response.text().await?;
            let data: Value = serde_json::from_str(strip_trends_prefix(&body))?;

            let ranked = data
                .get("default")
                .and_then(|d| d.get("rankedList"))
                .and_then(|r| r.as_array())
                .cloned()
                .unwrap_or_default();
            let extract = |list: Option<&Value>| -> Vec<Value> {
                list.and_then(|l| l.get("rankedKeyword"))
                    .and_then(|r| r.as_array())
                    .map(|items| {
                        items
                            .iter()
                            .map(|item| {
                                json!({
                                    "query": item.get("query"),
                                    "value": item.get("value"),
                                    "formatted_value": item.get("formattedValue"),
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default()
            };

            Ok(json!({
                "keyword": keyword,
                "timeframe": timeframe,
                "top": extract(ranked.first()),
                "rising": extract(ranked.get(1)),
            }))
        }
    })
}

// ============================================================================
// HELPERS & ASSEMBLY
// ============================================================================

/// Resolve the effective end timestamp (Unix seconds) from an optional
/// `end_date` argument and the retrodict cutoff; the cutoff always wins.
fn end_timestamp(args: &Value, cutoff_ts: Option<i64>) -> Result<i64> {
    let arg_ts = opt_str_arg(args, "end_date")
        .map(|s| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map_err(|_| Error::invalid_input(format!("Invalid end_date: '{s}'")))
                .map(|d| {
                    d.and_hms_opt(23, 59, 59)
                        .expect("end of day is a valid time")
                        .and_utc()
                        .timestamp()
                })
        })
        .transpose()?;

    let now = Utc::now().timestamp();
    let effective = match (arg_ts, cutoff_ts) {
        (Some(arg), Some(cutoff)) => arg.min(cutoff),
        (Some(arg), None) => arg,
        (None, Some(cutoff)) => cutoff,
        (None, None) => now,
    };
    Ok(effective.min(now))
}

/// Build the "markets" namespace tools.
pub fn market_tools(session: &Session) -> Vec<Tool> {
    vec![
        polymarket_price_tool(session),
        manifold_price_tool(session),
        stock_price_tool(session),
        polymarket_history_tool(session),
        manifold_history_tool(session),
        stock_history_tool(session),
    ]
}

/// Build the "financial" namespace tools.
pub fn financial_tools(session: &Session) -> Vec<Tool> {
    vec![
        fred_series_tool(session),
        fred_search_tool(session),
        company_financials_tool(session),
    ]
}

/// Build the "trends" namespace tools.
pub fn trends_tools(session: &Session) -> Vec<Tool> {
    vec![
        google_trends_tool(session),
        google_trends_compare_tool(session),
        google_trends_related_tool(session),
    ]
}
