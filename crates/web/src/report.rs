//! CSV projection of the span store.
//!
//! The heavier HTML/PDF report family is served elsewhere; this endpoint
//! exists so the span history can be pulled into a spreadsheet directly.

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use depthwatch_data::OutlierSpanRecord;

use crate::handlers::HistoryQuery;
use crate::state::AppState;

const REPORT_LIMIT: usize = 5_000;

/// `GET /api/outliers/report.csv`
pub async fn span_report_csv(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let spans = state
        .stores
        .spans
        .get_history(REPORT_LIMIT, query.symbol.as_deref(), None, None)
        .await;

    match render_csv(&spans) {
        Ok(body) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"outlier_spans.csv\"",
                ),
            ],
            body,
        )
            .into_response(),
        Err(error) => {
            tracing::error!(%error, "span report rendering failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn render_csv(spans: &[OutlierSpanRecord]) -> anyhow::Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    writer.write_record([
        "start_ts",
        "end_ts",
        "duration_ms",
        "symbol",
        "market",
        "exchange",
        "side",
        "price",
        "max_z",
        "avg_z",
        "count",
        "start_size",
        "end_size",
        "filled_pct",
        "size_delta",
        "size_delta_pct",
        "trade_buy_qty",
        "trade_sell_qty",
        "trade_count",
    ])?;

    for span in spans {
        writer.write_record(&[
            span.start_ts.to_string(),
            span.end_ts.to_string(),
            span.duration_ms.to_string(),
            span.symbol.clone(),
            span.market.to_string(),
            span.exchange.to_string(),
            span.side.to_string(),
            span.price.to_string(),
            span.max_z.to_string(),
            span.avg_z.to_string(),
            span.count.to_string(),
            span.start_size.to_string(),
            span.end_size.to_string(),
            span.filled_pct.to_string(),
            span.size_delta.to_string(),
            span.size_delta_pct.to_string(),
            span.trade_buy_qty.to_string(),
            span.trade_sell_qty.to_string(),
            span.trade_count.to_string(),
        ])?;
    }

    let bytes = writer.into_inner()?;
    Ok(String::from_utf8(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use depthwatch_core::{Exchange, Market, Side};
    use depthwatch_data::SpanContext;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn sample_span() -> OutlierSpanRecord {
        let ctx = SpanContext {
            best_bid: dec!(100),
            best_ask: dec!(100.1),
            spread_bps: 10.0,
            imbalance: 0.0,
            bid_depth: dec!(10),
            ask_depth: dec!(10),
            microprice: dec!(100.05),
            level_rank: 1,
            vol_1m: 0.0,
            vol_5m: 0.0,
        };
        OutlierSpanRecord {
            start_ts: 1_000,
            end_ts: 2_000,
            duration_ms: 1_000,
            symbol: "BTCUSDT".to_string(),
            market: Market::Spot,
            exchange: Exchange::Bybit,
            side: Side::Bid,
            price: dec!(100),
            max_z: 6.0,
            avg_z: 6.0,
            count: 1,
            start_size: dec!(500),
            end_size: dec!(500),
            filled_pct: 0.0,
            start_bps: 1.0,
            end_bps: 1.0,
            start_book: "{}".to_string(),
            end_book: "{}".to_string(),
            start: ctx.clone(),
            end: ctx,
            size_delta: Decimal::ZERO,
            size_delta_pct: 0.0,
            trade_buy_qty: Decimal::ZERO,
            trade_sell_qty: Decimal::ZERO,
            trade_count: 0,
        }
    }

    #[test]
    fn test_csv_has_header_and_rows() {
        let csv = render_csv(&[sample_span()]).unwrap();
        let mut lines = csv.lines();

        let header = lines.next().unwrap();
        assert!(header.starts_with("start_ts,end_ts,duration_ms,symbol"));

        let row = lines.next().unwrap();
        assert!(row.contains("BTCUSDT"));
        assert!(row.contains("Spot"));
        assert!(row.contains("bybit"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_empty_report_is_header_only() {
        let csv = render_csv(&[]).unwrap();
        assert_eq!(csv.lines().count(), 1);
    }
}
