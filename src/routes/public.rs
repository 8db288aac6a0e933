use actix_web::{web, HttpResponse, Result};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::{
    auth::{hash_password, new_id},
    booking,
    error::BookingError,
    models::{Role, ServiceRow, WorkingHoursRow},
    state::AppState,
};

#[derive(Deserialize)]
struct RegisterInput {
    first_name: String,
    last_name: String,
    email: String,
    phone: String,
    password: String,
    role: Role,
    address: Option<String>,
}

#[derive(Deserialize)]
pub struct AvailabilityQuery {
    provider_id: String,
    employee_id: Option<String>,
    date: String,
    time: String,
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
struct ProviderSummary {
    id: String,
    first_name: String,
    last_name: String,
    address: Option<String>,
    photo_url: Option<String>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/register").route(web::post().to(register)))
        .service(web::resource("/providers").route(web::get().to(list_providers)))
        .service(web::resource("/providers/{id}/services").route(web::get().to(list_services)))
        .service(
            web::resource("/providers/{id}/working-hours").route(web::get().to(working_hours)),
        )
        .service(web::resource("/availability").route(web::get().to(availability)))
        .service(web::resource("/health").route(web::get().to(health)));
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}

async fn register(
    state: web::Data<AppState>,
    body: web::Json<RegisterInput>,
) -> Result<HttpResponse, BookingError> {
    let input = body.into_inner();

    if input.email.trim().is_empty() || !input.email.contains('@') {
        return Err(BookingError::Validation("a valid email is required".to_string()));
    }
    if input.first_name.trim().is_empty() || input.last_name.trim().is_empty() {
        return Err(BookingError::Validation("first and last name are required".to_string()));
    }
    if input.password.len() < 6 {
        return Err(BookingError::Validation(
            "password must be at least 6 characters".to_string(),
        ));
    }
    // Employees are created by their provider, not through open registration.
    if input.role == Role::Employee {
        return Err(BookingError::Validation(
            "employee accounts are created by a provider".to_string(),
        ));
    }

    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = ?")
        .bind(input.email.trim())
        .fetch_one(&state.db)
        .await?;
    if existing > 0 {
        return Err(BookingError::Validation("email already registered".to_string()));
    }

    let password_hash = hash_password(&input.password)
        .map_err(|_| BookingError::Validation("password could not be processed".to_string()))?;

    let id = new_id();
    sqlx::query(
        r#"INSERT INTO users (id, first_name, last_name, email, phone, role, address, password_hash, active, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?)"#,
    )
    .bind(&id)
    .bind(input.first_name.trim())
    .bind(input.last_name.trim())
    .bind(input.email.trim())
    .bind(input.phone.trim())
    .bind(input.role)
    .bind(input.address)
    .bind(password_hash)
    .bind(Utc::now().to_rfc3339())
    .execute(&state.db)
    .await?;

    Ok(HttpResponse::Created().json(json!({ "id": id })))
}

async fn list_providers(state: web::Data<AppState>) -> Result<HttpResponse, BookingError> {
    let providers = sqlx::query_as::<_, ProviderSummary>(
        r#"SELECT id, first_name, last_name, address, photo_url
           FROM users WHERE role = 'provider' AND active = 1
           ORDER BY first_name, last_name"#,
    )
    .fetch_all(&state.db)
    .await?;

    Ok(HttpResponse::Ok().json(providers))
}

async fn list_services(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, BookingError> {
    let provider_id = path.into_inner();
    let services = sqlx::query_as::<_, ServiceRow>(
        "SELECT * FROM services WHERE provider_id = ? ORDER BY name",
    )
    .bind(&provider_id)
    .fetch_all(&state.db)
    .await?;

    Ok(HttpResponse::Ok().json(services))
}

async fn working_hours(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, BookingError> {
    let provider_id = path.into_inner();
    let hours = sqlx::query_as::<_, WorkingHoursRow>(
        "SELECT * FROM working_hours WHERE provider_id = ? ORDER BY day_of_week",
    )
    .bind(&provider_id)
    .fetch_all(&state.db)
    .await?;

    Ok(HttpResponse::Ok().json(hours))
}

async fn availability(
    state: web::Data<AppState>,
    query: web::Query<AvailabilityQuery>,
) -> Result<HttpResponse, BookingError> {
    let query = query.into_inner();
    let available = booking::check_availability(
        &state.db,
        &query.provider_id,
        query.employee_id.as_deref(),
        &query.date,
        &query.time,
    )
    .await?;

    Ok(HttpResponse::Ok().json(json!({ "available": available })))
}
