use serde::{Deserialize, Serialize};

/// Appointment lifecycle states. `pending` is the only initial state;
/// `rejected`, `cancelled` and `completed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Rejected,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 5] = [
        AppointmentStatus::Pending,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Rejected,
        AppointmentStatus::Cancelled,
        AppointmentStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Rejected => "rejected",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Completed => "completed",
        }
    }

    /// Non-terminal statuses keep their slot occupied. The availability scan
    /// derives its status filter from this, so the rule lives here only.
    pub fn holds_slot(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Pending | AppointmentStatus::Confirmed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Provider,
    Employee,
}

/// Who is driving a status change. Providers act for their employees too.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Customer,
    Provider,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct UserRow {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub role: Role,
    pub provider_id: Option<String>,
    pub address: Option<String>,
    pub photo_url: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub active: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ServiceRow {
    pub id: String,
    pub provider_id: String,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub duration_minutes: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct WorkingHoursRow {
    pub id: String,
    pub provider_id: String,
    pub day_of_week: i64,
    pub start_time: String,
    pub end_time: String,
    pub available: i64,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct AppointmentRow {
    pub id: String,
    pub customer_id: String,
    pub provider_id: String,
    pub employee_id: Option<String>,
    pub service_name: String,
    pub service_price: f64,
    pub service_duration_minutes: i64,
    pub date: String,
    pub time: String,
    pub status: AppointmentStatus,
    pub reviewed: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ReviewRow {
    pub id: String,
    pub appointment_id: String,
    pub customer_id: String,
    pub provider_id: String,
    pub rating: i64,
    pub comment: String,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct NotificationRow {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub message: String,
    pub kind: String,
    pub is_read: i64,
    pub appointment_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct FavoriteRow {
    pub id: String,
    pub customer_id: String,
    pub provider_id: String,
    pub provider_name: String,
    pub provider_photo_url: Option<String>,
    pub created_at: String,
}

/// Price and duration are copied onto the appointment at booking time so a
/// later edit to the service does not rewrite history.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceSnapshot {
    pub name: String,
    pub price: f64,
    pub duration_minutes: i64,
}
