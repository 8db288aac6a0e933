use actix_web::{web, HttpResponse};
use actix_web_httpauth::middleware::HttpAuthentication;
use serde_json::json;

use crate::{
    auth::{user_validator, AuthUser},
    error::BookingError,
    models::NotificationRow,
    notify,
    state::AppState,
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/me")
            .wrap(HttpAuthentication::basic(user_validator))
            .service(web::resource("/notifications").route(web::get().to(list_notifications)))
            .service(
                web::resource("/notifications/{id}/read").route(web::post().to(mark_read)),
            )
            .service(
                web::resource("/push-subscription").route(web::post().to(push_subscription)),
            ),
    );
}

async fn list_notifications(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
) -> Result<HttpResponse, BookingError> {
    let rows = sqlx::query_as::<_, NotificationRow>(
        "SELECT * FROM notifications WHERE user_id = ? ORDER BY created_at DESC LIMIT 100",
    )
    .bind(&auth.id)
    .fetch_all(&state.db)
    .await?;

    Ok(HttpResponse::Ok().json(rows))
}

async fn mark_read(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> Result<HttpResponse, BookingError> {
    let notification_id = path.into_inner();
    let updated = notify::mark_read(&state.db, &auth.id, &notification_id).await?;
    if !updated {
        return Err(BookingError::NotFound);
    }
    Ok(HttpResponse::Ok().json(json!({ "read": true })))
}

async fn push_subscription(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    body: web::Bytes,
) -> Result<HttpResponse, BookingError> {
    let raw = String::from_utf8(body.to_vec()).unwrap_or_default();
    if raw.trim().is_empty() {
        return Err(BookingError::Validation("subscription payload is required".to_string()));
    }

    notify::store_subscription(&state.db, &auth.id, &raw).await?;
    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}
