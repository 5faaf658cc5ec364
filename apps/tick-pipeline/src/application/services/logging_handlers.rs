//! Default logging subscribers, one per event kind.

use crate::domain::events::{Event, EventKind, EventPayload, Severity};

use super::dispatcher::{EventDispatcher, HandlerError, SubscriptionId};

/// Subscribe a structured logging handler for every event kind.
pub fn register_logging_handlers(dispatcher: &EventDispatcher) -> Vec<(EventKind, SubscriptionId)> {
    EventKind::ALL
        .into_iter()
        .map(|kind| (kind, dispatcher.subscribe(kind, log_event)))
        .collect()
}

#[allow(clippy::unnecessary_wraps)]
fn log_event(event: &Event) -> Result<(), HandlerError> {
    let source = event.source().as_str();
    match event.payload() {
        EventPayload::StockDataLoaded(p) => tracing::info!(
            source,
            symbol = %p.symbol,
            records = p.records_count,
            latest_price = p.latest_price,
            "Stock data loaded"
        ),
        EventPayload::CompanyInfoUpdated(p) => tracing::info!(
            source,
            symbol = %p.symbol,
            company = p.company_name.as_deref().unwrap_or("-"),
            "Company info updated"
        ),
        EventPayload::BatchCompleted(p) => tracing::info!(
            source,
            processed = p.symbols_processed,
            successful = p.successful_symbols,
            records = p.total_records,
            "Batch completed"
        ),
        EventPayload::ThresholdReached(p) => tracing::info!(
            source,
            stock_count = p.stock_count,
            threshold = p.threshold,
            "Data threshold reached"
        ),
        EventPayload::StreamingReady(p) => tracing::info!(
            source,
            stock_count = p.stock_count,
            "Streaming ready"
        ),
        EventPayload::StreamingStarted(p) => tracing::info!(
            source,
            stocks = p.stocks_count,
            tick_interval_secs = p.tick_interval,
            "Streaming started"
        ),
        EventPayload::StreamingStopped(p) => tracing::info!(
            source,
            reason = %p.reason,
            ticks = p.ticks_generated,
            stocks = p.stocks_count,
            "Streaming stopped"
        ),
        EventPayload::TickGenerated(p) => tracing::debug!(
            source,
            symbol = %p.symbol,
            price = p.price,
            tick_number = p.tick_number,
            "Tick"
        ),
        EventPayload::SystemStatus(p) => tracing::info!(
            source,
            service = %p.service_name,
            status = %p.status,
            message = %p.message,
            "System status"
        ),
        EventPayload::HealthCheck(p) => tracing::debug!(
            source,
            service = %p.service_name,
            status = %p.status,
            "Health check"
        ),
        EventPayload::Error(p) => match p.severity {
            Severity::Low | Severity::Medium => tracing::warn!(
                source,
                service = %p.service_name,
                error_type = %p.error_type,
                severity = %p.severity,
                error = %p.error_message,
                "Error reported"
            ),
            Severity::High | Severity::Critical => tracing::error!(
                source,
                service = %p.service_name,
                error_type = %p.error_type,
                severity = %p.severity,
                error = %p.error_message,
                "Error reported"
            ),
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_one_handler_per_kind() {
        let dispatcher = EventDispatcher::default();
        let subscriptions = register_logging_handlers(&dispatcher);

        assert_eq!(subscriptions.len(), EventKind::ALL.len());
        for kind in EventKind::ALL {
            assert_eq!(dispatcher.subscriber_count(kind), 1);
        }

        let outcome = dispatcher.publish(Event::error("t", "m", "svc", Severity::Critical));
        assert_eq!(outcome.failed, 0);
    }
}
