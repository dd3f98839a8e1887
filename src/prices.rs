//! Daily price bars from the Yahoo chart endpoint.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::error::{PriceError, TransportError};
use crate::models::PriceRecord;
use crate::settings::PriceSettings;
use crate::transport::Transport;

#[derive(Deserialize)]
struct ChartEnvelope {
    chart: Option<ChartNode>,
}

#[derive(Deserialize)]
struct ChartNode {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartApiError>,
}

#[derive(Deserialize)]
struct ChartApiError {
    code: String,
    description: String,
}

#[derive(Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteBlock>,
}

#[derive(Deserialize)]
struct QuoteBlock {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

/// Lookback window for a period string: `Nd` is N days, `Nmo` is 30·N days,
/// anything else is a week.
pub fn period_to_days(period: &str) -> i64 {
    let parsed = if let Some(n) = period.strip_suffix("mo") {
        n.parse::<i64>().ok().map(|n| n * 30)
    } else if let Some(n) = period.strip_suffix('d') {
        n.parse::<i64>().ok()
    } else {
        None
    };
    parsed.unwrap_or(7)
}

/// Chart request URL for `ticker` ending at `now`.
pub fn chart_url(settings: &PriceSettings, ticker: &str, now: DateTime<Utc>) -> Result<Url, TransportError> {
    let raw = format!("{}{ticker}", settings.chart_url);
    let mut url = Url::parse(&raw).map_err(|source| TransportError::InvalidUrl { url: raw.clone(), source })?;
    let start = now.timestamp() - period_to_days(&settings.period) * 86_400;
    url.query_pairs_mut()
        .append_pair("period1", &start.to_string())
        .append_pair("period2", &now.timestamp().to_string())
        .append_pair("interval", &settings.interval)
        .append_pair("includePrePost", "false");
    Ok(url)
}

/// Decode a chart response into price records.
///
/// Rows missing open or close are skipped. Dates are the UTC calendar date
/// of the bar timestamp.
pub fn parse_chart(ticker: &str, body: &[u8]) -> Result<Vec<PriceRecord>, PriceError> {
    let envelope: ChartEnvelope = serde_json::from_slice(body)?;
    let node = envelope.chart.ok_or(PriceError::Empty)?;
    if let Some(err) = node.error {
        return Err(PriceError::Api {
            code: err.code,
            description: err.description,
        });
    }
    let result = node
        .result
        .and_then(|r| r.into_iter().next())
        .ok_or(PriceError::Empty)?;
    let Some(quote) = result.indicators.quote.into_iter().next() else {
        return Err(PriceError::Empty);
    };

    let mut records = Vec::with_capacity(result.timestamp.len());
    for (i, ts) in result.timestamp.iter().enumerate() {
        let open = quote.open.get(i).copied().flatten();
        let close = quote.close.get(i).copied().flatten();
        let (Some(open), Some(close)) = (open, close) else {
            debug!(ts, "Skipping bar without open/close");
            continue;
        };
        let Some(date) = DateTime::<Utc>::from_timestamp(*ts, 0).map(|d| d.date_naive()) else {
            warn!(ts, "Skipping bar with out-of-range timestamp");
            continue;
        };
        let volume = quote.volume.get(i).copied().flatten().unwrap_or(0.0) as i64;
        records.push(PriceRecord::from_bar(ticker, date, open, close, volume));
    }
    Ok(records)
}

/// Fetch the configured window of daily bars for `ticker`.
#[instrument(level = "info", skip(transport, settings))]
pub async fn fetch_prices(
    transport: &Transport,
    settings: &PriceSettings,
    ticker: &str,
) -> Result<Vec<PriceRecord>, PriceError> {
    let url = chart_url(settings, ticker, Utc::now())?;
    let raw = transport.fetch(url.as_str()).await?;
    let records = parse_chart(ticker, &raw.body)?;
    info!(count = records.len(), "Fetched daily prices");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;
    use crate::settings::TransportSettings;
    use chrono::{NaiveDate, TimeZone};
    use httpmock::{Method::GET, MockServer};

    // 2024-05-01 13:30 UTC, 2024-05-02 13:30 UTC, 2024-05-03 13:30 UTC
    const CHART: &str = r#"{"chart":{"result":[{
        "meta":{"symbol":"TSLA"},
        "timestamp":[1714570200,1714656600,1714743000],
        "indicators":{"quote":[{
            "open":[180.0,null,182.5],
            "close":[183.6,181.0,182.5],
            "volume":[1000,2000,null]
        }]}
    }],"error":null}}"#;

    #[test]
    fn test_period_to_days() {
        assert_eq!(period_to_days("5d"), 5);
        assert_eq!(period_to_days("1mo"), 30);
        assert_eq!(period_to_days("3mo"), 90);
        assert_eq!(period_to_days("1y"), 7);
        assert_eq!(period_to_days("xd"), 7);
    }

    #[test]
    fn test_chart_url_query() {
        let now = Utc.with_ymd_and_hms(2024, 5, 6, 0, 0, 0).unwrap();
        let url = chart_url(&PriceSettings::default(), "005930.KS", now).unwrap();
        assert_eq!(url.path(), "/v8/finance/chart/005930.KS");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("period2".to_string(), now.timestamp().to_string())));
        assert!(pairs.contains(&("period1".to_string(), (now.timestamp() - 5 * 86_400).to_string())));
        assert!(pairs.contains(&("interval".to_string(), "1d".to_string())));
        assert!(pairs.contains(&("includePrePost".to_string(), "false".to_string())));
    }

    #[test]
    fn test_parse_chart_skips_incomplete_rows() {
        let records = parse_chart("TSLA", CHART.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].date, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        assert_eq!(records[0].change, 3.6);
        assert_eq!(records[0].change_pct, 2.0);
        assert_eq!(records[0].direction, Direction::Up);
        assert_eq!(records[0].volume, 1000);

        assert_eq!(records[1].date, NaiveDate::from_ymd_opt(2024, 5, 3).unwrap());
        assert_eq!(records[1].direction, Direction::Flat);
        assert_eq!(records[1].volume, 0);
    }

    #[test]
    fn test_parse_chart_api_error() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found"}}}"#;
        let err = parse_chart("NOPE", body.as_bytes()).unwrap_err();
        assert!(matches!(err, PriceError::Api { ref code, .. } if code == "Not Found"));
        assert!(matches!(parse_chart("X", b"not json"), Err(PriceError::Decode(_))));
    }

    #[tokio::test]
    async fn test_fetch_prices_over_http() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/v8/finance/chart/TSLA")
                .query_param("interval", "1d")
                .query_param("includePrePost", "false");
            then.status(200).header("content-type", "application/json").body(CHART);
        });

        let transport = Transport::new(&TransportSettings {
            total_retries: 0,
            ..TransportSettings::default()
        })
        .unwrap();
        let settings = PriceSettings {
            chart_url: server.url("/v8/finance/chart/"),
            ..PriceSettings::default()
        };
        let records = fetch_prices(&transport, &settings, "TSLA").await.unwrap();

        mock.assert();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.ticker == "TSLA"));
    }
}
