use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::Serialize;
use sqlx::{Sqlite, SqlitePool};

use crate::{
    auth::new_id,
    error::{BookingError, BookingResult},
    models::{Actor, AppointmentRow, AppointmentStatus, ReviewRow, ServiceSnapshot},
};

/// Emitted after every successful lifecycle transition so the notification
/// fan-out and the live event stream can react. The booking core's
/// responsibility ends here.
#[derive(Clone, Debug, Serialize)]
pub struct LifecycleEvent {
    pub appointment_id: String,
    pub previous_status: Option<AppointmentStatus>,
    pub new_status: AppointmentStatus,
    pub customer_id: String,
    pub provider_id: String,
    pub date: String,
    pub time: String,
}

/// The legal transition table. Anything not listed here is rejected, which is
/// stricter than the historical clients that trusted their UI to only offer
/// valid moves.
pub fn check_transition(
    from: AppointmentStatus,
    to: AppointmentStatus,
    actor: Actor,
) -> BookingResult<()> {
    use crate::models::AppointmentStatus::*;
    let allowed = matches!(
        (from, to, actor),
        (Pending, Confirmed, Actor::Provider)
            | (Pending, Rejected, Actor::Provider)
            | (Pending, Cancelled, Actor::Customer)
            | (Confirmed, Completed, Actor::Provider)
            | (Confirmed, Cancelled, Actor::Provider)
    );
    if allowed {
        Ok(())
    } else {
        Err(BookingError::InvalidTransition { from, to })
    }
}

fn parse_slot(date: &str, time: &str) -> BookingResult<NaiveDateTime> {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| BookingError::Validation("date must be YYYY-MM-DD".to_string()))?;
    let time = NaiveTime::parse_from_str(time, "%H:%M")
        .map_err(|_| BookingError::Validation("time must be HH:mm".to_string()))?;
    Ok(date.and_time(time))
}

/// Exact-match occupancy scan: a slot is taken when any pending or confirmed
/// appointment for this provider (narrowed to the employee when one is given)
/// has the identical date and time strings. Service durations are not
/// consulted, so neighbouring slots never block each other.
async fn slot_taken<'c, E>(
    executor: E,
    provider_id: &str,
    employee_id: Option<&str>,
    date: &str,
    time: &str,
) -> Result<bool, sqlx::Error>
where
    E: sqlx::Executor<'c, Database = Sqlite>,
{
    let holding: Vec<AppointmentStatus> = AppointmentStatus::ALL
        .into_iter()
        .filter(AppointmentStatus::holds_slot)
        .collect();
    let placeholders = vec!["?"; holding.len()].join(", ");

    let mut sql = format!(
        "SELECT COUNT(*) FROM appointments \
         WHERE provider_id = ? AND date = ? AND time = ? AND status IN ({placeholders})"
    );
    if employee_id.is_some() {
        sql.push_str(" AND employee_id = ?");
    }

    let mut query = sqlx::query_scalar::<_, i64>(&sql)
        .bind(provider_id)
        .bind(date)
        .bind(time);
    for status in holding {
        query = query.bind(status);
    }
    if let Some(employee_id) = employee_id {
        query = query.bind(employee_id);
    }

    let count = query.fetch_one(executor).await?;
    Ok(count > 0)
}

/// Availability check exposed to clients. A query failure is reported as
/// `AvailabilityCheckFailed`, never as a free slot.
pub async fn check_availability(
    pool: &SqlitePool,
    provider_id: &str,
    employee_id: Option<&str>,
    date: &str,
    time: &str,
) -> BookingResult<bool> {
    let slot = parse_slot(date, time)?;
    if slot < Utc::now().naive_utc() {
        return Ok(false);
    }
    let taken = slot_taken(pool, provider_id, employee_id, date, time)
        .await
        .map_err(|err| {
            log::warn!("Availability query failed: {err}");
            BookingError::AvailabilityCheckFailed
        })?;
    Ok(!taken)
}

/// Books a slot. The occupancy re-check and the insert run inside one
/// transaction, so the second of two racing customers loses instead of both
/// writers succeeding as the historical clients allowed.
pub async fn create_appointment(
    pool: &SqlitePool,
    customer_id: &str,
    provider_id: &str,
    employee_id: Option<&str>,
    service: &ServiceSnapshot,
    date: &str,
    time: &str,
) -> BookingResult<LifecycleEvent> {
    let slot = parse_slot(date, time)?;
    if slot < Utc::now().naive_utc() {
        return Err(BookingError::SlotUnavailable);
    }
    if service.name.trim().is_empty() {
        return Err(BookingError::Validation("service name is required".to_string()));
    }

    let mut tx = pool.begin().await?;

    let taken = slot_taken(&mut *tx, provider_id, employee_id, date, time)
        .await
        .map_err(|err| {
            log::warn!("Availability query failed: {err}");
            BookingError::AvailabilityCheckFailed
        })?;
    if taken {
        return Err(BookingError::SlotUnavailable);
    }

    let appointment_id = new_id();
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"INSERT INTO appointments
           (id, customer_id, provider_id, employee_id, service_name, service_price,
            service_duration_minutes, date, time, status, reviewed, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)"#,
    )
    .bind(&appointment_id)
    .bind(customer_id)
    .bind(provider_id)
    .bind(employee_id)
    .bind(&service.name)
    .bind(service.price)
    .bind(service.duration_minutes)
    .bind(date)
    .bind(time)
    .bind(AppointmentStatus::Pending)
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(LifecycleEvent {
        appointment_id,
        previous_status: None,
        new_status: AppointmentStatus::Pending,
        customer_id: customer_id.to_string(),
        provider_id: provider_id.to_string(),
        date: date.to_string(),
        time: time.to_string(),
    })
}

pub async fn fetch_appointment(
    pool: &SqlitePool,
    appointment_id: &str,
) -> BookingResult<AppointmentRow> {
    sqlx::query_as::<_, AppointmentRow>("SELECT * FROM appointments WHERE id = ?")
        .bind(appointment_id)
        .fetch_optional(pool)
        .await?
        .ok_or(BookingError::NotFound)
}

/// Moves an appointment to `new_status` on behalf of `actor`. Returns `None`
/// when the appointment is already in the target state; the write is skipped
/// and no event is emitted.
pub async fn update_appointment_status(
    pool: &SqlitePool,
    appointment_id: &str,
    actor: Actor,
    new_status: AppointmentStatus,
) -> BookingResult<Option<LifecycleEvent>> {
    let row = fetch_appointment(pool, appointment_id).await?;

    if row.status == new_status {
        return Ok(None);
    }
    check_transition(row.status, new_status, actor)?;

    sqlx::query("UPDATE appointments SET status = ?, updated_at = ? WHERE id = ?")
        .bind(new_status)
        .bind(Utc::now().to_rfc3339())
        .bind(appointment_id)
        .execute(pool)
        .await?;

    Ok(Some(LifecycleEvent {
        appointment_id: row.id,
        previous_status: Some(row.status),
        new_status,
        customer_id: row.customer_id,
        provider_id: row.provider_id,
        date: row.date,
        time: row.time,
    }))
}

/// One review per appointment, only after completion. The duplicate check and
/// the insert share a transaction so a failed submission never leaves the
/// appointment flagged as reviewed.
pub async fn submit_review(
    pool: &SqlitePool,
    appointment_id: &str,
    customer_id: &str,
    rating: i64,
    comment: &str,
) -> BookingResult<ReviewRow> {
    if !(1..=5).contains(&rating) {
        return Err(BookingError::InvalidRating);
    }

    let appointment = fetch_appointment(pool, appointment_id).await?;
    if appointment.customer_id != customer_id {
        return Err(BookingError::NotFound);
    }
    if appointment.status != AppointmentStatus::Completed {
        return Err(BookingError::NotCompleted);
    }

    let mut tx = pool.begin().await?;

    let existing: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM reviews WHERE appointment_id = ?")
            .bind(appointment_id)
            .fetch_one(&mut *tx)
            .await?;
    if existing > 0 {
        return Err(BookingError::AlreadyReviewed);
    }

    let review = ReviewRow {
        id: new_id(),
        appointment_id: appointment.id.clone(),
        customer_id: customer_id.to_string(),
        provider_id: appointment.provider_id.clone(),
        rating,
        comment: comment.trim().to_string(),
        created_at: Utc::now().to_rfc3339(),
    };

    sqlx::query(
        r#"INSERT INTO reviews (id, appointment_id, customer_id, provider_id, rating, comment, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&review.id)
    .bind(&review.appointment_id)
    .bind(&review.customer_id)
    .bind(&review.provider_id)
    .bind(review.rating)
    .bind(&review.comment)
    .bind(&review.created_at)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE appointments SET reviewed = 1, updated_at = ? WHERE id = ?")
        .bind(Utc::now().to_rfc3339())
        .bind(appointment_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(review)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AppointmentStatus::*;

    #[test]
    fn provider_resolves_pending_requests() {
        assert!(check_transition(Pending, Confirmed, Actor::Provider).is_ok());
        assert!(check_transition(Pending, Rejected, Actor::Provider).is_ok());
    }

    #[test]
    fn customer_can_only_cancel_pending() {
        assert!(check_transition(Pending, Cancelled, Actor::Customer).is_ok());
        assert!(check_transition(Confirmed, Cancelled, Actor::Customer).is_err());
        assert!(check_transition(Pending, Confirmed, Actor::Customer).is_err());
        assert!(check_transition(Pending, Rejected, Actor::Customer).is_err());
    }

    #[test]
    fn confirmed_can_complete_or_cancel() {
        assert!(check_transition(Confirmed, Completed, Actor::Provider).is_ok());
        assert!(check_transition(Confirmed, Cancelled, Actor::Provider).is_ok());
        assert!(check_transition(Confirmed, Rejected, Actor::Provider).is_err());
        assert!(check_transition(Confirmed, Pending, Actor::Provider).is_err());
    }

    #[test]
    fn pending_cannot_skip_to_completed() {
        assert!(check_transition(Pending, Completed, Actor::Provider).is_err());
        assert!(check_transition(Pending, Completed, Actor::Customer).is_err());
    }

    #[test]
    fn terminal_states_reject_everything() {
        for from in [Rejected, Cancelled, Completed] {
            for to in [Pending, Confirmed, Rejected, Cancelled, Completed] {
                if from == to {
                    continue;
                }
                assert!(check_transition(from, to, Actor::Provider).is_err());
                assert!(check_transition(from, to, Actor::Customer).is_err());
            }
        }
    }

    #[test]
    fn only_pending_and_confirmed_hold_their_slot() {
        assert!(Pending.holds_slot());
        assert!(Confirmed.holds_slot());
        assert!(!Rejected.holds_slot());
        assert!(!Cancelled.holds_slot());
        assert!(!Completed.holds_slot());
    }

    #[test]
    fn slot_strings_are_validated() {
        assert!(parse_slot("2030-05-01", "14:00").is_ok());
        assert!(parse_slot("01-05-2030", "14:00").is_err());
        assert!(parse_slot("2030-05-01", "2pm").is_err());
    }
}

#[cfg(test)]
mod store_tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    const DATE: &str = "2031-03-01";
    const TIME: &str = "14:00";

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory pool");
        crate::db::run_migrations(&pool).await.expect("migrations");
        pool
    }

    fn snapshot() -> ServiceSnapshot {
        ServiceSnapshot {
            name: "Saç Kesimi".to_string(),
            price: 350.0,
            duration_minutes: 45,
        }
    }

    async fn book(pool: &SqlitePool, customer: &str) -> BookingResult<LifecycleEvent> {
        create_appointment(pool, customer, "p1", None, &snapshot(), DATE, TIME).await
    }

    #[tokio::test]
    async fn booking_an_open_slot_yields_pending() {
        let pool = test_pool().await;
        let event = book(&pool, "c1").await.unwrap();
        assert_eq!(event.new_status, AppointmentStatus::Pending);
        assert_eq!(event.previous_status, None);

        let row = fetch_appointment(&pool, &event.appointment_id).await.unwrap();
        assert_eq!(row.status, AppointmentStatus::Pending);
        assert_eq!(row.service_name, "Saç Kesimi");
        assert_eq!(row.reviewed, 0);
    }

    #[tokio::test]
    async fn booking_an_occupied_slot_fails() {
        let pool = test_pool().await;
        book(&pool, "c1").await.unwrap();
        let err = book(&pool, "c2").await.unwrap_err();
        assert!(matches!(err, BookingError::SlotUnavailable));
    }

    #[tokio::test]
    async fn confirmed_appointments_still_hold_the_slot() {
        let pool = test_pool().await;
        let event = book(&pool, "c1").await.unwrap();
        update_appointment_status(
            &pool,
            &event.appointment_id,
            Actor::Provider,
            AppointmentStatus::Confirmed,
        )
        .await
        .unwrap();

        let available = check_availability(&pool, "p1", None, DATE, TIME).await.unwrap();
        assert!(!available);
    }

    #[tokio::test]
    async fn terminal_appointments_free_the_slot() {
        let pool = test_pool().await;
        let event = book(&pool, "c1").await.unwrap();
        update_appointment_status(
            &pool,
            &event.appointment_id,
            Actor::Customer,
            AppointmentStatus::Cancelled,
        )
        .await
        .unwrap();

        let available = check_availability(&pool, "p1", None, DATE, TIME).await.unwrap();
        assert!(available);
        book(&pool, "c2").await.unwrap();
    }

    #[tokio::test]
    async fn distinct_employees_do_not_block_each_other() {
        let pool = test_pool().await;
        create_appointment(&pool, "c1", "p1", Some("e1"), &snapshot(), DATE, TIME)
            .await
            .unwrap();
        create_appointment(&pool, "c2", "p1", Some("e2"), &snapshot(), DATE, TIME)
            .await
            .unwrap();

        let err = create_appointment(&pool, "c3", "p1", Some("e1"), &snapshot(), DATE, TIME)
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::SlotUnavailable));
    }

    #[tokio::test]
    async fn past_slots_are_rejected() {
        let pool = test_pool().await;
        let err = create_appointment(&pool, "c1", "p1", None, &snapshot(), "2020-01-01", TIME)
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::SlotUnavailable));

        let available = check_availability(&pool, "p1", None, "2020-01-01", TIME).await.unwrap();
        assert!(!available);
    }

    #[tokio::test]
    async fn failed_availability_query_is_never_reported_as_free() {
        let pool = test_pool().await;
        sqlx::query("DROP TABLE appointments")
            .execute(&pool)
            .await
            .unwrap();

        let err = check_availability(&pool, "p1", None, DATE, TIME).await.unwrap_err();
        assert!(matches!(err, BookingError::AvailabilityCheckFailed));

        let err = book(&pool, "c1").await.unwrap_err();
        assert!(matches!(err, BookingError::AvailabilityCheckFailed));
    }

    #[tokio::test]
    async fn unknown_appointment_is_not_found() {
        let pool = test_pool().await;
        let err = update_appointment_status(
            &pool,
            "missing",
            Actor::Provider,
            AppointmentStatus::Confirmed,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BookingError::NotFound));
    }

    #[tokio::test]
    async fn same_status_update_is_a_no_op() {
        let pool = test_pool().await;
        let event = book(&pool, "c1").await.unwrap();
        let outcome = update_appointment_status(
            &pool,
            &event.appointment_id,
            Actor::Provider,
            AppointmentStatus::Pending,
        )
        .await
        .unwrap();
        assert!(outcome.is_none());

        let row = fetch_appointment(&pool, &event.appointment_id).await.unwrap();
        assert_eq!(row.status, AppointmentStatus::Pending);
    }

    #[tokio::test]
    async fn pending_cannot_jump_to_completed() {
        let pool = test_pool().await;
        let event = book(&pool, "c1").await.unwrap();
        let err = update_appointment_status(
            &pool,
            &event.appointment_id,
            Actor::Provider,
            AppointmentStatus::Completed,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BookingError::InvalidTransition { .. }));

        let row = fetch_appointment(&pool, &event.appointment_id).await.unwrap();
        assert_eq!(row.status, AppointmentStatus::Pending);
    }

    #[tokio::test]
    async fn cancelling_a_completed_appointment_is_rejected() {
        let pool = test_pool().await;
        let event = book(&pool, "c1").await.unwrap();
        for status in [AppointmentStatus::Confirmed, AppointmentStatus::Completed] {
            update_appointment_status(&pool, &event.appointment_id, Actor::Provider, status)
                .await
                .unwrap();
        }

        let err = update_appointment_status(
            &pool,
            &event.appointment_id,
            Actor::Customer,
            AppointmentStatus::Cancelled,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BookingError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn review_requires_completion_and_happens_once() {
        let pool = test_pool().await;
        let event = book(&pool, "c1").await.unwrap();

        let err = submit_review(&pool, &event.appointment_id, "c1", 5, "Harika").await.unwrap_err();
        assert!(matches!(err, BookingError::NotCompleted));

        for status in [AppointmentStatus::Confirmed, AppointmentStatus::Completed] {
            update_appointment_status(&pool, &event.appointment_id, Actor::Provider, status)
                .await
                .unwrap();
        }

        let review = submit_review(&pool, &event.appointment_id, "c1", 5, "Harika").await.unwrap();
        assert_eq!(review.rating, 5);
        assert_eq!(review.provider_id, "p1");

        let row = fetch_appointment(&pool, &event.appointment_id).await.unwrap();
        assert_eq!(row.reviewed, 1);

        let err = submit_review(&pool, &event.appointment_id, "c1", 4, "Tekrar").await.unwrap_err();
        assert!(matches!(err, BookingError::AlreadyReviewed));
    }

    #[tokio::test]
    async fn review_rating_is_bounded() {
        let pool = test_pool().await;
        let event = book(&pool, "c1").await.unwrap();
        for rating in [0, 6, -1] {
            let err = submit_review(&pool, &event.appointment_id, "c1", rating, "").await.unwrap_err();
            assert!(matches!(err, BookingError::InvalidRating));
        }
    }

    #[tokio::test]
    async fn review_by_another_customer_is_not_found() {
        let pool = test_pool().await;
        let event = book(&pool, "c1").await.unwrap();
        for status in [AppointmentStatus::Confirmed, AppointmentStatus::Completed] {
            update_appointment_status(&pool, &event.appointment_id, Actor::Provider, status)
                .await
                .unwrap();
        }

        let err = submit_review(&pool, &event.appointment_id, "c2", 5, "").await.unwrap_err();
        assert!(matches!(err, BookingError::NotFound));
    }
}
