use serde::Deserialize;
use sqlx::SqlitePool;
use web_push::{
    ContentEncoding, IsahcWebPushClient, SubscriptionInfo, VapidSignatureBuilder, WebPushClient,
    WebPushError, WebPushMessageBuilder, URL_SAFE_NO_PAD,
};

use crate::{
    auth::new_id,
    booking::LifecycleEvent,
    models::AppointmentStatus,
    state::{AppState, PushConfig},
};

pub const KIND_APPOINTMENT: &str = "appointment";
pub const KIND_REVIEW: &str = "review";

#[derive(Debug, Deserialize)]
pub struct PushSubscriptionInput {
    pub endpoint: String,
    pub keys: PushKeys,
}

#[derive(Debug, Deserialize)]
pub struct PushKeys {
    pub p256dh: String,
    pub auth: String,
}

#[derive(Debug, sqlx::FromRow)]
struct PushSubscriptionRow {
    endpoint: String,
    p256dh: String,
    auth: String,
}

/// Fans a lifecycle transition out to both parties: a notification record
/// each, best-effort web push, and the live event stream. Channel failures
/// are logged and never reach the caller that made the transition.
pub async fn dispatch(state: &AppState, event: &LifecycleEvent) {
    let slot = format!("{} {}", event.date, event.time);
    let (customer_msg, provider_msg) = match event.new_status {
        AppointmentStatus::Pending => (
            ("Randevu talebi alındı", format!("We received your booking request for {slot}. You'll hear back soon.")),
            ("Yeni randevu talebi", format!("A customer requested an appointment for {slot}.")),
        ),
        AppointmentStatus::Confirmed => (
            ("Randevunuz onaylandı", format!("Your appointment for {slot} was confirmed.")),
            ("Randevu onaylandı", format!("You confirmed the appointment for {slot}.")),
        ),
        AppointmentStatus::Rejected => (
            ("Randevu reddedildi", format!("Your appointment request for {slot} was declined.")),
            ("Randevu reddedildi", format!("You declined the appointment request for {slot}.")),
        ),
        AppointmentStatus::Cancelled => (
            ("Randevu iptal edildi", format!("The appointment for {slot} was cancelled.")),
            ("Randevu iptal edildi", format!("The appointment for {slot} was cancelled.")),
        ),
        AppointmentStatus::Completed => (
            ("Randevu tamamlandı", format!("Your appointment for {slot} is complete. You can now leave a review.")),
            ("Randevu tamamlandı", format!("You marked the appointment for {slot} as completed.")),
        ),
    };

    deliver(
        state,
        &event.customer_id,
        customer_msg.0,
        &customer_msg.1,
        KIND_APPOINTMENT,
        Some(&event.appointment_id),
    )
    .await;
    deliver(
        state,
        &event.provider_id,
        provider_msg.0,
        &provider_msg.1,
        KIND_APPOINTMENT,
        Some(&event.appointment_id),
    )
    .await;

    let _ = state.events.send(event.clone());
}

/// Tells a provider about a freshly submitted review.
pub async fn dispatch_review(state: &AppState, provider_id: &str, appointment_id: &str, rating: i64) {
    deliver(
        state,
        provider_id,
        "Yeni değerlendirme",
        &format!("A customer left a {rating}-star review."),
        KIND_REVIEW,
        Some(appointment_id),
    )
    .await;
}

async fn deliver(
    state: &AppState,
    user_id: &str,
    title: &str,
    message: &str,
    kind: &str,
    appointment_id: Option<&str>,
) {
    if let Err(err) = record(&state.db, user_id, title, message, kind, appointment_id).await {
        log::warn!("Notification record failed for user {user_id}: {err}");
    }
    push_to_user(state, user_id, title, message).await;
}

/// Writes a notification record. Returns the new notification id.
pub async fn record(
    pool: &SqlitePool,
    user_id: &str,
    title: &str,
    message: &str,
    kind: &str,
    appointment_id: Option<&str>,
) -> Result<String, sqlx::Error> {
    let id = new_id();
    sqlx::query(
        r#"INSERT INTO notifications (id, user_id, title, message, kind, is_read, appointment_id, created_at)
           VALUES (?, ?, ?, ?, ?, 0, ?, ?)"#,
    )
    .bind(&id)
    .bind(user_id)
    .bind(title)
    .bind(message)
    .bind(kind)
    .bind(appointment_id)
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(id)
}

pub async fn mark_read(
    pool: &SqlitePool,
    user_id: &str,
    notification_id: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ? AND user_id = ?")
        .bind(notification_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn store_subscription(
    pool: &SqlitePool,
    user_id: &str,
    raw_subscription: &str,
) -> Result<(), sqlx::Error> {
    let subscription: PushSubscriptionInput = match serde_json::from_str(raw_subscription) {
        Ok(value) => value,
        Err(err) => {
            log::warn!("Invalid push subscription payload: {err}");
            return Ok(());
        }
    };

    sqlx::query(
        r#"INSERT INTO push_subscriptions (id, user_id, endpoint, p256dh, auth, created_at)
           VALUES (?, ?, ?, ?, ?, ?)
           ON CONFLICT(user_id, endpoint) DO UPDATE SET
             p256dh = excluded.p256dh,
             auth = excluded.auth"#,
    )
    .bind(new_id())
    .bind(user_id)
    .bind(subscription.endpoint)
    .bind(subscription.keys.p256dh)
    .bind(subscription.keys.auth)
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

async fn push_to_user(state: &AppState, user_id: &str, title: &str, body: &str) {
    if !state.push.enabled() {
        return;
    }

    let rows = sqlx::query_as::<_, PushSubscriptionRow>(
        "SELECT endpoint, p256dh, auth FROM push_subscriptions WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_all(&state.db)
    .await
    .unwrap_or_default();

    if rows.is_empty() {
        return;
    }

    let payload = serde_json::json!({
        "title": title,
        "body": body,
    })
    .to_string();

    for row in rows {
        if let Err(err) = send_push(&state.push, row, &payload).await {
            log::warn!("Push send failed: {err}");
        }
    }
}

async fn send_push(
    config: &PushConfig,
    row: PushSubscriptionRow,
    payload: &str,
) -> Result<(), WebPushError> {
    let subscription = SubscriptionInfo::new(row.endpoint, row.p256dh, row.auth);
    let mut builder = WebPushMessageBuilder::new(&subscription);
    builder.set_payload(ContentEncoding::Aes128Gcm, payload.as_bytes());

    let mut vapid_builder =
        VapidSignatureBuilder::from_base64(&config.private_key, URL_SAFE_NO_PAD, &subscription)?;
    vapid_builder.add_claim("sub", config.subject.clone());

    builder.set_vapid_signature(vapid_builder.build()?);

    let client = IsahcWebPushClient::new()?;
    client.send(builder.build()?).await?;
    Ok(())
}
