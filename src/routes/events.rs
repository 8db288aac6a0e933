use actix_web::{http::header, web, HttpMessage, HttpRequest, HttpResponse};
use actix_web_httpauth::middleware::HttpAuthentication;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::{
    auth::{user_validator, AuthUser},
    booking::LifecycleEvent,
    state::AppState,
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/me/events")
            .wrap(HttpAuthentication::basic(user_validator))
            .route(web::get().to(stream_events)),
    );
}

/// Server-sent stream of the caller's own lifecycle events, used by clients
/// for live appointment and notification badges.
async fn stream_events(state: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    let user_id = match req.extensions().get::<AuthUser>() {
        Some(user) => user.id.clone(),
        None => return HttpResponse::Unauthorized().finish(),
    };

    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |result| {
        let event = match result {
            Ok(event) => event,
            Err(_) => return None,
        };
        if event.customer_id != user_id && event.provider_id != user_id {
            return None;
        }
        Some(Ok::<web::Bytes, actix_web::Error>(event_to_bytes(&event)))
    });

    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(stream)
}

fn event_to_bytes(event: &LifecycleEvent) -> web::Bytes {
    let payload = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    web::Bytes::from(format!("event: update\ndata: {}\n\n", payload))
}
