use actix_web::{web, HttpResponse};
use actix_web_httpauth::middleware::HttpAuthentication;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::{
    auth::{hash_password, new_id, provider_validator, AuthUser},
    booking,
    error::BookingError,
    models::{Actor, AppointmentRow, AppointmentStatus, Role, ServiceRow, UserRow, WorkingHoursRow},
    notify,
    state::AppState,
};

#[derive(Deserialize)]
struct StatusInput {
    status: AppointmentStatus,
}

#[derive(Deserialize)]
struct AppointmentFilter {
    status: Option<AppointmentStatus>,
    date: Option<String>,
}

#[derive(Deserialize)]
struct ServiceInput {
    name: String,
    description: Option<String>,
    price: f64,
    duration_minutes: i64,
}

#[derive(Deserialize)]
struct WorkingHoursEntry {
    day_of_week: i64,
    start_time: String,
    end_time: String,
    available: bool,
}

#[derive(Deserialize)]
struct EmployeeInput {
    first_name: String,
    last_name: String,
    email: String,
    phone: String,
    password: String,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/provider")
            .wrap(HttpAuthentication::basic(provider_validator))
            .service(web::resource("/dashboard").route(web::get().to(dashboard)))
            .service(web::resource("/appointments").route(web::get().to(list_appointments)))
            .service(
                web::resource("/appointments/{id}/status").route(web::post().to(update_status)),
            )
            .service(
                web::resource("/services")
                    .route(web::get().to(list_services))
                    .route(web::post().to(create_service)),
            )
            .service(
                web::resource("/services/{id}")
                    .route(web::put().to(update_service))
                    .route(web::delete().to(delete_service)),
            )
            .service(
                web::resource("/working-hours")
                    .route(web::get().to(get_working_hours))
                    .route(web::put().to(put_working_hours)),
            )
            .service(
                web::resource("/employees")
                    .route(web::get().to(list_employees))
                    .route(web::post().to(create_employee)),
            ),
    );
}

async fn dashboard(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
) -> Result<HttpResponse, BookingError> {
    let mut counts = serde_json::Map::new();
    for status in [
        AppointmentStatus::Pending,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Rejected,
        AppointmentStatus::Cancelled,
        AppointmentStatus::Completed,
    ] {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM appointments WHERE provider_id = ? AND status = ?",
        )
        .bind(&auth.id)
        .bind(status)
        .fetch_one(&state.db)
        .await?;
        counts.insert(status.as_str().to_string(), json!(count));
    }

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM appointments WHERE provider_id = ?")
        .bind(&auth.id)
        .fetch_one(&state.db)
        .await?;

    Ok(HttpResponse::Ok().json(json!({ "total": total, "by_status": counts })))
}

async fn list_appointments(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    query: web::Query<AppointmentFilter>,
) -> Result<HttpResponse, BookingError> {
    let filter = query.into_inner();
    let rows = sqlx::query_as::<_, AppointmentRow>(
        "SELECT * FROM appointments WHERE provider_id = ? ORDER BY date DESC, time DESC",
    )
    .bind(&auth.id)
    .fetch_all(&state.db)
    .await?;

    let rows: Vec<AppointmentRow> = rows
        .into_iter()
        .filter(|row| filter.status.map_or(true, |status| row.status == status))
        .filter(|row| filter.date.as_deref().map_or(true, |date| row.date == date))
        .collect();

    Ok(HttpResponse::Ok().json(rows))
}

async fn update_status(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    body: web::Json<StatusInput>,
) -> Result<HttpResponse, BookingError> {
    let appointment_id = path.into_inner();
    let new_status = body.into_inner().status;

    let row = booking::fetch_appointment(&state.db, &appointment_id).await?;
    if row.provider_id != auth.id {
        return Err(BookingError::NotFound);
    }

    let event = booking::update_appointment_status(
        &state.db,
        &appointment_id,
        Actor::Provider,
        new_status,
    )
    .await?;

    if let Some(event) = event {
        notify::dispatch(&state, &event).await;
    }

    Ok(HttpResponse::Ok().json(json!({ "status": new_status })))
}

async fn list_services(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
) -> Result<HttpResponse, BookingError> {
    let services = sqlx::query_as::<_, ServiceRow>(
        "SELECT * FROM services WHERE provider_id = ? ORDER BY name",
    )
    .bind(&auth.id)
    .fetch_all(&state.db)
    .await?;

    Ok(HttpResponse::Ok().json(services))
}

fn validate_service(input: &ServiceInput) -> Result<(), BookingError> {
    if input.name.trim().is_empty() {
        return Err(BookingError::Validation("service name is required".to_string()));
    }
    if input.price < 0.0 {
        return Err(BookingError::Validation("price cannot be negative".to_string()));
    }
    if input.duration_minutes <= 0 {
        return Err(BookingError::Validation(
            "duration must be a positive number of minutes".to_string(),
        ));
    }
    Ok(())
}

async fn create_service(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    body: web::Json<ServiceInput>,
) -> Result<HttpResponse, BookingError> {
    let input = body.into_inner();
    validate_service(&input)?;

    let id = new_id();
    sqlx::query(
        r#"INSERT INTO services (id, provider_id, name, description, price, duration_minutes, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(&auth.id)
    .bind(input.name.trim())
    .bind(input.description.unwrap_or_default())
    .bind(input.price)
    .bind(input.duration_minutes)
    .bind(Utc::now().to_rfc3339())
    .execute(&state.db)
    .await?;

    Ok(HttpResponse::Created().json(json!({ "id": id })))
}

async fn update_service(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    body: web::Json<ServiceInput>,
) -> Result<HttpResponse, BookingError> {
    let service_id = path.into_inner();
    let input = body.into_inner();
    validate_service(&input)?;

    let result = sqlx::query(
        r#"UPDATE services SET name = ?, description = ?, price = ?, duration_minutes = ?
           WHERE id = ? AND provider_id = ?"#,
    )
    .bind(input.name.trim())
    .bind(input.description.unwrap_or_default())
    .bind(input.price)
    .bind(input.duration_minutes)
    .bind(&service_id)
    .bind(&auth.id)
    .execute(&state.db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(BookingError::NotFound);
    }
    Ok(HttpResponse::Ok().json(json!({ "id": service_id })))
}

async fn delete_service(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> Result<HttpResponse, BookingError> {
    let service_id = path.into_inner();
    let result = sqlx::query("DELETE FROM services WHERE id = ? AND provider_id = ?")
        .bind(&service_id)
        .bind(&auth.id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(BookingError::NotFound);
    }
    Ok(HttpResponse::NoContent().finish())
}

async fn get_working_hours(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
) -> Result<HttpResponse, BookingError> {
    let hours = sqlx::query_as::<_, WorkingHoursRow>(
        "SELECT * FROM working_hours WHERE provider_id = ? ORDER BY day_of_week",
    )
    .bind(&auth.id)
    .fetch_all(&state.db)
    .await?;

    Ok(HttpResponse::Ok().json(hours))
}

async fn put_working_hours(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    body: web::Json<Vec<WorkingHoursEntry>>,
) -> Result<HttpResponse, BookingError> {
    let entries = body.into_inner();
    for entry in &entries {
        if !(0..=6).contains(&entry.day_of_week) {
            return Err(BookingError::Validation(
                "day_of_week must be between 0 and 6".to_string(),
            ));
        }
    }

    for entry in entries {
        sqlx::query(
            r#"INSERT INTO working_hours (id, provider_id, day_of_week, start_time, end_time, available)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(provider_id, day_of_week) DO UPDATE SET
                 start_time = excluded.start_time,
                 end_time = excluded.end_time,
                 available = excluded.available"#,
        )
        .bind(new_id())
        .bind(&auth.id)
        .bind(entry.day_of_week)
        .bind(&entry.start_time)
        .bind(&entry.end_time)
        .bind(entry.available as i64)
        .execute(&state.db)
        .await?;
    }

    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}

async fn list_employees(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
) -> Result<HttpResponse, BookingError> {
    let employees = sqlx::query_as::<_, UserRow>(
        "SELECT * FROM users WHERE role = ? AND provider_id = ? AND active = 1 ORDER BY first_name",
    )
    .bind(Role::Employee)
    .bind(&auth.id)
    .fetch_all(&state.db)
    .await?;

    Ok(HttpResponse::Ok().json(employees))
}

async fn create_employee(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    body: web::Json<EmployeeInput>,
) -> Result<HttpResponse, BookingError> {
    let input = body.into_inner();
    if input.first_name.trim().is_empty() || input.last_name.trim().is_empty() {
        return Err(BookingError::Validation("first and last name are required".to_string()));
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
        r#"INSERT INTO users (id, first_name, last_name, email, phone, role, provider_id, password_hash, active, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?)"#,
    )
    .bind(&id)
    .bind(input.first_name.trim())
    .bind(input.last_name.trim())
    .bind(input.email.trim())
    .bind(input.phone.trim())
    .bind(Role::Employee)
    .bind(&auth.id)
    .bind(password_hash)
    .bind(Utc::now().to_rfc3339())
    .execute(&state.db)
    .await?;

    Ok(HttpResponse::Created().json(json!({ "id": id })))
}
