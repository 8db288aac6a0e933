use actix_web::{web, HttpResponse};
use actix_web_httpauth::middleware::HttpAuthentication;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::{
    auth::{customer_validator, new_id, AuthUser},
    booking,
    error::BookingError,
    models::{
        Actor, AppointmentRow, AppointmentStatus, FavoriteRow, Role, ServiceRow, ServiceSnapshot,
        UserRow,
    },
    notify,
    state::AppState,
};

#[derive(Deserialize)]
struct BookingInput {
    provider_id: String,
    employee_id: Option<String>,
    service_id: String,
    date: String,
    time: String,
}

#[derive(Deserialize)]
struct ReviewInput {
    rating: i64,
    comment: Option<String>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/customer")
            .wrap(HttpAuthentication::basic(customer_validator))
            .service(
                web::resource("/appointments")
                    .route(web::get().to(list_appointments))
                    .route(web::post().to(book_appointment)),
            )
            .service(
                web::resource("/appointments/{id}/cancel").route(web::post().to(cancel_appointment)),
            )
            .service(
                web::resource("/appointments/{id}/review").route(web::post().to(review_appointment)),
            )
            .service(web::resource("/favorites").route(web::get().to(list_favorites)))
            .service(
                web::resource("/favorites/{provider_id}")
                    .route(web::put().to(add_favorite))
                    .route(web::delete().to(remove_favorite)),
            ),
    );
}

async fn list_appointments(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
) -> Result<HttpResponse, BookingError> {
    let rows = sqlx::query_as::<_, AppointmentRow>(
        "SELECT * FROM appointments WHERE customer_id = ? ORDER BY created_at DESC",
    )
    .bind(&auth.id)
    .fetch_all(&state.db)
    .await?;

    Ok(HttpResponse::Ok().json(rows))
}

async fn book_appointment(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    body: web::Json<BookingInput>,
) -> Result<HttpResponse, BookingError> {
    let input = body.into_inner();

    let service = sqlx::query_as::<_, ServiceRow>(
        "SELECT * FROM services WHERE id = ? AND provider_id = ?",
    )
    .bind(&input.service_id)
    .bind(&input.provider_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or(BookingError::NotFound)?;

    if let Some(employee_id) = input.employee_id.as_deref() {
        let employee = sqlx::query_as::<_, UserRow>(
            "SELECT * FROM users WHERE id = ? AND role = ? AND provider_id = ? AND active = 1",
        )
        .bind(employee_id)
        .bind(Role::Employee)
        .bind(&input.provider_id)
        .fetch_optional(&state.db)
        .await?;
        if employee.is_none() {
            return Err(BookingError::NotFound);
        }
    }

    let snapshot = ServiceSnapshot {
        name: service.name,
        price: service.price,
        duration_minutes: service.duration_minutes,
    };

    let event = booking::create_appointment(
        &state.db,
        &auth.id,
        &input.provider_id,
        input.employee_id.as_deref(),
        &snapshot,
        &input.date,
        &input.time,
    )
    .await?;

    notify::dispatch(&state, &event).await;

    Ok(HttpResponse::Created().json(json!({ "id": event.appointment_id })))
}

async fn cancel_appointment(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> Result<HttpResponse, BookingError> {
    let appointment_id = path.into_inner();

    let row = booking::fetch_appointment(&state.db, &appointment_id).await?;
    if row.customer_id != auth.id {
        return Err(BookingError::NotFound);
    }

    let event = booking::update_appointment_status(
        &state.db,
        &appointment_id,
        Actor::Customer,
        AppointmentStatus::Cancelled,
    )
    .await?;

    if let Some(event) = event {
        notify::dispatch(&state, &event).await;
    }

    Ok(HttpResponse::Ok().json(json!({ "status": AppointmentStatus::Cancelled })))
}

async fn review_appointment(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    body: web::Json<ReviewInput>,
) -> Result<HttpResponse, BookingError> {
    let appointment_id = path.into_inner();
    let input = body.into_inner();

    let review = booking::submit_review(
        &state.db,
        &appointment_id,
        &auth.id,
        input.rating,
        input.comment.as_deref().unwrap_or(""),
    )
    .await?;

    notify::dispatch_review(&state, &review.provider_id, &appointment_id, review.rating).await;

    Ok(HttpResponse::Created().json(json!({ "id": review.id })))
}

async fn list_favorites(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
) -> Result<HttpResponse, BookingError> {
    let rows = sqlx::query_as::<_, FavoriteRow>(
        "SELECT * FROM favorites WHERE customer_id = ? ORDER BY created_at DESC",
    )
    .bind(&auth.id)
    .fetch_all(&state.db)
    .await?;

    Ok(HttpResponse::Ok().json(rows))
}

async fn add_favorite(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> Result<HttpResponse, BookingError> {
    let provider_id = path.into_inner();

    let provider = sqlx::query_as::<_, UserRow>(
        "SELECT * FROM users WHERE id = ? AND role = ? AND active = 1",
    )
    .bind(&provider_id)
    .bind(Role::Provider)
    .fetch_optional(&state.db)
    .await?
    .ok_or(BookingError::NotFound)?;

    sqlx::query(
        r#"INSERT INTO favorites (id, customer_id, provider_id, provider_name, provider_photo_url, created_at)
           VALUES (?, ?, ?, ?, ?, ?)
           ON CONFLICT(customer_id, provider_id) DO NOTHING"#,
    )
    .bind(new_id())
    .bind(&auth.id)
    .bind(&provider_id)
    .bind(format!("{} {}", provider.first_name, provider.last_name))
    .bind(provider.photo_url)
    .bind(Utc::now().to_rfc3339())
    .execute(&state.db)
    .await?;

    Ok(HttpResponse::Ok().json(json!({ "favorited": true })))
}

async fn remove_favorite(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> Result<HttpResponse, BookingError> {
    let provider_id = path.into_inner();

    sqlx::query("DELETE FROM favorites WHERE customer_id = ? AND provider_id = ?")
        .bind(&auth.id)
        .bind(&provider_id)
        .execute(&state.db)
        .await?;

    Ok(HttpResponse::Ok().json(json!({ "favorited": false })))
}
