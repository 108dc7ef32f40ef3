//! Real-time stock notifications over server-sent events.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use common::LocationId;
use futures_util::stream::{Stream, StreamExt};
use ledger_store::LedgerStore;
use notify::{Channel, Notification};
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use super::parse_id;
use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct EventParams {
    /// Also receive `stock:changed` events for this location.
    pub location: Option<String>,
}

fn wanted(notification: &Notification, location: Option<LocationId>) -> bool {
    match notification.channel {
        Channel::Global => true,
        Channel::Location(id) => location == Some(id),
    }
}

/// GET /api/v1/stock/events: the `global` channel, plus `location:<id>` when
/// `?location=` is given. SSE event names are the notification names.
#[tracing::instrument(skip(state))]
pub async fn stream<S: LedgerStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    query: Result<Query<EventParams>, QueryRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let Query(params) = query.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let location = params
        .location
        .as_deref()
        .map(|id| parse_id::<LocationId>("location", id))
        .transpose()?;

    let receiver = state.transport.subscribe();
    tracing::info!(?location, "stream subscriber connected");

    let events = BroadcastStream::new(receiver).filter_map(move |item| {
        let event = match item {
            Ok(notification) if wanted(&notification, location) => {
                match Event::default()
                    .event(notification.event.as_str())
                    .json_data(&notification.payload)
                {
                    Ok(event) => Some(Ok(event)),
                    Err(e) => {
                        tracing::warn!(error = %e, "could not encode stream event");
                        None
                    }
                }
            }
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "stream subscriber lagged, notifications skipped");
                None
            }
        };
        futures_util::future::ready(event)
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
